use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use serde::{Deserialize, Serialize};
use shared::{DecrementScope, ListingFilter, ReconcileReport, ReservationRequest};

use crate::geocode::Geocoder;
use crate::models::FoodItem;
use crate::store;
use crate::webhook::{self, WebhookPayload};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub decrement_scope: DecrementScope,
    pub geocoder: Option<Geocoder>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RestaurantQuery {
    pub cuisine: Option<String>,
    pub availability: Option<String>,
    pub distance: Option<String>,
    pub lat: Option<String>,
    pub lng: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RestaurantView {
    #[serde(flatten)]
    pub item: FoodItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calc_distance: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub rest_name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateReservationResponse {
    pub message: String,
    pub inserted: bool,
    pub reconciled: ReconcileReport,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl std::fmt::Display) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/restaurants", get(list_restaurants))
        .route("/reservations", post(create_reservation))
        .route("/webhook", post(receive_webhook))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

/// Narrows loaded listings to those matching `filter`, attaching the distance
/// from the search origin when one was given.
pub fn select_restaurants(items: Vec<FoodItem>, filter: &ListingFilter) -> Vec<RestaurantView> {
    items
        .into_iter()
        .filter(|item| filter.matches_cuisine(item.cuisine.as_deref()))
        .filter(|item| filter.matches_bags(item.number_of_bags))
        .filter_map(|item| {
            let calc_distance = filter.distance_to(item.coordinates()?)?;
            Some(RestaurantView {
                item,
                calc_distance,
            })
        })
        .collect()
}

pub async fn list_restaurants(
    State(state): State<AppState>,
    Query(query): Query<RestaurantQuery>,
) -> Result<Json<Vec<RestaurantView>>, ApiError> {
    tracing::debug!(?query, "Listing restaurants");
    let filter = ListingFilter::parse(
        query.cuisine.as_deref(),
        query.availability.as_deref(),
        query.distance.as_deref(),
        query.lat.as_deref(),
        query.lng.as_deref(),
    )
    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let mut conn = state.pool.get().await.map_err(|e| {
        tracing::error!("Failed to get connection: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
    })?;

    let items = store::located_listings(&mut conn, filter.min_bags)
        .await
        .map_err(|e| {
            tracing::error!("Error in /restaurants: {:#}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
        })?;

    Ok(Json(select_restaurants(items, &filter)))
}

pub async fn create_reservation(
    State(state): State<AppState>,
    Json(request): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<CreateReservationResponse>), ApiError> {
    let reservation = ReservationRequest {
        first_name: request.first_name,
        last_name: request.last_name,
        email: request.email,
        phone_number: request.phone_number,
        restaurant_name: request.rest_name,
    };

    let mut conn = state.pool.get().await.map_err(|e| {
        tracing::error!("Failed to get connection: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
    })?;

    let result = async {
        let inserted = store::insert_reservations(&mut conn, std::slice::from_ref(&reservation)).await?;
        let reconciled = store::reconcile_one(&mut conn, &reservation.key(), state.decrement_scope).await?;
        anyhow::Ok((inserted, reconciled))
    }
    .await;

    match result {
        Ok((inserted, reconciled)) => {
            tracing::info!(
                "Reservation for {} at {} recorded ({} listings decremented)",
                reservation.email,
                reservation.restaurant_name,
                reconciled.decremented
            );
            Ok((
                StatusCode::CREATED,
                Json(CreateReservationResponse {
                    message: "Reservation created".to_string(),
                    inserted: inserted > 0,
                    reconciled,
                }),
            ))
        }
        Err(e) => {
            tracing::error!("Failed to create reservation: {:#}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error"))
        }
    }
}

pub async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<&'static str, ApiError> {
    tracing::info!("Received webhook for sheet: {}", payload.sheet_name);

    let mut conn = state.pool.get().await.map_err(|e| {
        tracing::error!("Failed to get connection: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
    })?;

    match webhook::apply_webhook(&mut *conn, state.geocoder.as_ref(), &payload).await {
        Ok(_) => Ok("Webhook processed"),
        Err(e) if e.status().is_server_error() => {
            tracing::error!("Error processing webhook: {:#}", e);
            Err(api_error(e.status(), "Error processing webhook"))
        }
        Err(e) => {
            tracing::warn!("Rejected webhook: {}", e);
            Err(api_error(e.status(), e))
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
