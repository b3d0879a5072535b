use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use shared::Coordinates;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::DbPool;
use crate::store::SurplusStore;

pub const BACKFILL_PERIOD: Duration = Duration::from_secs(10);

pub const GEOCODE_API_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

#[async_trait]
pub trait AddressLocator: Sync {
    /// `None` when the address cannot be resolved; failures are logged, not
    /// returned.
    async fn locate(&self, address: &str) -> Option<Coordinates>;
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

fn first_location(response: GeocodeResponse) -> Option<Coordinates> {
    if response.status != "OK" {
        return None;
    }
    response.results.into_iter().next().map(|result| Coordinates {
        latitude: result.geometry.location.lat,
        longitude: result.geometry.location.lng,
    })
}

#[derive(Clone)]
pub struct Geocoder {
    http_client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl Geocoder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: GEOCODE_API_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    async fn request(&self, address: &str) -> reqwest::Result<GeocodeResponse> {
        self.http_client
            .get(&self.api_url)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl AddressLocator for Geocoder {
    async fn locate(&self, address: &str) -> Option<Coordinates> {
        match self.request(address).await {
            Ok(response) => {
                let status = response.status.clone();
                let location = first_location(response);
                if location.is_none() {
                    warn!("Geocoding failed for {}: {}", address, status);
                }
                location
            }
            Err(e) => {
                warn!("Error geocoding {}: {}", address, e);
                None
            }
        }
    }
}

/// Geocodes every stored listing that lacks coordinates. Returns how many
/// listings were updated.
pub async fn fill_missing_coordinates<S, L>(store: &mut S, locator: &L) -> Result<usize>
where
    S: SurplusStore + ?Sized,
    L: AddressLocator + ?Sized,
{
    let pending = store.missing_coordinates().await?;
    let mut updated = 0;

    for (id, address) in pending {
        if address.is_empty() {
            continue;
        }
        if let Some(at) = locator.locate(&address).await {
            store.set_coordinates(id, at).await?;
            info!("Updated {}: {}, {}", address, at.latitude, at.longitude);
            updated += 1;
        }
    }

    Ok(updated)
}

/// Runs [`fill_missing_coordinates`] on a pooled connection every `period`
/// until the task is aborted. A failed pass is logged and retried on the next
/// tick.
pub fn spawn_backfill<L>(pool: DbPool, locator: L, period: Duration) -> JoinHandle<()>
where
    L: AddressLocator + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let mut conn = match pool.get().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Coordinate backfill could not get a connection: {}", e);
                    continue;
                }
            };
            match fill_missing_coordinates(&mut *conn, &locator).await {
                Ok(0) => debug!("No listings to geocode"),
                Ok(located) => info!("Geocoded {} listings", located),
                Err(e) => warn!("Coordinate backfill failed: {:#}", e),
            }
        }
    })
}
