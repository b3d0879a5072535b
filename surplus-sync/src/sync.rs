use anyhow::{Context, Result};
use shared::{
    has_new_food, has_new_reservation, parse_records, DecrementScope, FoodListing, FoodMerge,
    ReconcileReport, ReservationRequest,
};
use tracing::info;

use crate::sheets::{Collection, RecordSource};
use crate::store::SurplusStore;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Drop and recreate both tables before syncing.
    pub reset_tables: bool,
    pub food_merge: FoodMerge,
    pub decrement_scope: DecrementScope,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            reset_tables: true,
            food_merge: FoodMerge::default(),
            decrement_scope: DecrementScope::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Collections {
    pub food: Collection,
    pub reservations: Collection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub new_food: bool,
    pub new_reservations: bool,
    pub food_rows: usize,
    pub reservation_rows: usize,
    pub reconciled: Option<ReconcileReport>,
}

/// One pass of the job: prepare tables, pull both sheets, write when either
/// sheet holds an identity the store has not seen, and reconcile when new
/// reservations arrived.
pub async fn run_sync<S, R>(
    store: &mut S,
    source: &R,
    collections: &Collections,
    options: &SyncOptions,
) -> Result<SyncReport>
where
    S: SurplusStore + ?Sized,
    R: RecordSource + ?Sized,
{
    if options.reset_tables {
        store.reset().await?;
    }
    store.ensure().await?;

    let food_records = source
        .fetch_records(&collections.food)
        .await
        .with_context(|| format!("Failed to fetch {}", collections.food))?;
    let reservation_records = source
        .fetch_records(&collections.reservations)
        .await
        .with_context(|| format!("Failed to fetch {}", collections.reservations))?;

    let listings = parse_records(&food_records, FoodListing::from_record)
        .with_context(|| format!("Malformed row in {}", collections.food))?;
    let reservations = parse_records(&reservation_records, ReservationRequest::from_record)
        .with_context(|| format!("Malformed row in {}", collections.reservations))?;
    info!(
        "Fetched {} food listings and {} reservations",
        listings.len(),
        reservations.len()
    );

    let mut report = SyncReport {
        new_food: has_new_food(&listings, &store.restaurant_names().await?),
        new_reservations: has_new_reservation(&reservations, &store.reservation_keys().await?),
        ..SyncReport::default()
    };

    if report.new_food || report.new_reservations {
        info!("New data detected. Updating database...");
        report.food_rows = store.upsert_food(&listings, options.food_merge).await?;
        report.reservation_rows = store.insert_reservations(&reservations).await?;
    } else {
        info!("No new listings or reservations");
    }

    if report.new_reservations {
        info!("Processing new reservations...");
        report.reconciled = Some(store.reconcile(options.decrement_scope).await?);
    }

    Ok(report)
}
