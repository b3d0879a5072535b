//! Single-row pushes from the spreadsheet, applied without waiting for the
//! next sync.

use axum::http::StatusCode;
use serde::Deserialize;
use shared::{FoodListing, FoodMerge, RecordError, SheetRecord};
use thiserror::Error;
use tracing::info;

use crate::geocode::AddressLocator;
use crate::store::SurplusStore;

pub const FOOD_SHEET: &str = "Food Leftover (Responses)";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub sheet_name: String,
    pub record: SheetRecord,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unknown sheet name {0:?}")]
    UnknownSheet(String),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("geocoding is not configured")]
    GeocodingDisabled,
    #[error("geocoding failed for address: {0}")]
    Geocoding(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownSheet(_) | Self::Record(_) => StatusCode::BAD_REQUEST,
            Self::GeocodingDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Geocoding(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Geocodes and upserts one food row, refreshing prices and comments of an
/// existing listing. Nothing is written when the address cannot be located.
pub async fn apply_webhook<S, L>(
    store: &mut S,
    locator: Option<&L>,
    payload: &WebhookPayload,
) -> Result<FoodListing, WebhookError>
where
    S: SurplusStore + ?Sized,
    L: AddressLocator + ?Sized,
{
    if payload.sheet_name != FOOD_SHEET {
        return Err(WebhookError::UnknownSheet(payload.sheet_name.clone()));
    }
    let listing = FoodListing::from_record(&payload.record)?;
    let locator = locator.ok_or(WebhookError::GeocodingDisabled)?;
    let at = locator
        .locate(&listing.location)
        .await
        .ok_or_else(|| WebhookError::Geocoding(listing.location.clone()))?;

    store
        .upsert_food(std::slice::from_ref(&listing), FoodMerge::Listing)
        .await?;
    store
        .locate_listing(&listing.restaurant_name, &listing.food_type, at)
        .await?;

    info!(
        "Stored {} from {} at {}, {}",
        listing.food_type, listing.restaurant_name, at.latitude, at.longitude
    );
    Ok(listing)
}
