//! Persistence for listings and reservations.
//!
//! The free functions operate on any `AsyncPgConnection` (a dedicated one for
//! the sync job, a pooled one for the API). The connection itself implements
//! [`SurplusStore`], the trait the pipeline is written against, and
//! [`PgStore`] owns one such connection.

#[cfg(test)]
pub(crate) mod memory;

use anyhow::{Context, Result};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use shared::{
    Coordinates, DecrementScope, FoodListing, FoodMerge, ReconcileReport, ReservationKey,
    ReservationRequest,
};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::models::*;
use crate::schema::*;

const CREATE_TABLES: &str = include_str!("../../sql/create_tables.sql");
const DROP_TABLES: &str = include_str!("../../sql/drop_tables.sql");

#[async_trait]
pub trait SurplusStore: Send {
    /// Drops both tables and everything depending on them.
    async fn reset(&mut self) -> Result<()>;
    /// Creates both tables when absent. Existing tables are left as they are.
    async fn ensure(&mut self) -> Result<()>;
    async fn restaurant_names(&mut self) -> Result<HashSet<String>>;
    async fn reservation_keys(&mut self) -> Result<HashSet<ReservationKey>>;
    async fn upsert_food(&mut self, listings: &[FoodListing], merge: FoodMerge) -> Result<usize>;
    /// Insert-or-ignore on the reservation identity.
    async fn insert_reservations(&mut self, reservations: &[ReservationRequest]) -> Result<usize>;
    async fn reconcile(&mut self, scope: DecrementScope) -> Result<ReconcileReport>;
    async fn missing_coordinates(&mut self) -> Result<Vec<(i32, String)>>;
    async fn set_coordinates(&mut self, id: i32, at: Coordinates) -> Result<()>;
    /// Sets coordinates on the listing with this identity. Returns rows updated.
    async fn locate_listing(&mut self, restaurant: &str, food_type: &str, at: Coordinates) -> Result<usize>;
}

pub struct PgStore {
    conn: AsyncPgConnection,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let conn = AsyncPgConnection::establish(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { conn })
    }

    pub fn connection(&mut self) -> &mut AsyncPgConnection {
        &mut self.conn
    }
}

#[async_trait]
impl SurplusStore for AsyncPgConnection {
    async fn reset(&mut self) -> Result<()> {
        reset_tables(self).await
    }

    async fn ensure(&mut self) -> Result<()> {
        ensure_tables(self).await
    }

    async fn restaurant_names(&mut self) -> Result<HashSet<String>> {
        restaurant_names(self).await
    }

    async fn reservation_keys(&mut self) -> Result<HashSet<ReservationKey>> {
        reservation_keys(self).await
    }

    async fn upsert_food(&mut self, listings: &[FoodListing], merge: FoodMerge) -> Result<usize> {
        upsert_food(self, listings, merge).await
    }

    async fn insert_reservations(&mut self, reservations: &[ReservationRequest]) -> Result<usize> {
        insert_reservations(self, reservations).await
    }

    async fn reconcile(&mut self, scope: DecrementScope) -> Result<ReconcileReport> {
        reconcile(self, scope).await
    }

    async fn missing_coordinates(&mut self) -> Result<Vec<(i32, String)>> {
        missing_coordinates(self).await
    }

    async fn set_coordinates(&mut self, id: i32, at: Coordinates) -> Result<()> {
        set_coordinates(self, id, at).await
    }

    async fn locate_listing(&mut self, restaurant: &str, food_type: &str, at: Coordinates) -> Result<usize> {
        locate_listing(self, restaurant, food_type, at).await
    }
}

#[async_trait]
impl SurplusStore for PgStore {
    async fn reset(&mut self) -> Result<()> {
        self.conn.reset().await
    }

    async fn ensure(&mut self) -> Result<()> {
        self.conn.ensure().await
    }

    async fn restaurant_names(&mut self) -> Result<HashSet<String>> {
        self.conn.restaurant_names().await
    }

    async fn reservation_keys(&mut self) -> Result<HashSet<ReservationKey>> {
        self.conn.reservation_keys().await
    }

    async fn upsert_food(&mut self, listings: &[FoodListing], merge: FoodMerge) -> Result<usize> {
        self.conn.upsert_food(listings, merge).await
    }

    async fn insert_reservations(&mut self, reservations: &[ReservationRequest]) -> Result<usize> {
        self.conn.insert_reservations(reservations).await
    }

    async fn reconcile(&mut self, scope: DecrementScope) -> Result<ReconcileReport> {
        self.conn.reconcile(scope).await
    }

    async fn missing_coordinates(&mut self) -> Result<Vec<(i32, String)>> {
        self.conn.missing_coordinates().await
    }

    async fn set_coordinates(&mut self, id: i32, at: Coordinates) -> Result<()> {
        self.conn.set_coordinates(id, at).await
    }

    async fn locate_listing(&mut self, restaurant: &str, food_type: &str, at: Coordinates) -> Result<usize> {
        self.conn.locate_listing(restaurant, food_type, at).await
    }
}

pub async fn reset_tables(conn: &mut AsyncPgConnection) -> Result<()> {
    conn.batch_execute(DROP_TABLES)
        .await
        .context("Failed to drop tables")?;
    info!("Dropped food_items and customer_reservations");
    Ok(())
}

pub async fn ensure_tables(conn: &mut AsyncPgConnection) -> Result<()> {
    conn.batch_execute(CREATE_TABLES)
        .await
        .context("Failed to create tables")?;
    info!("Tables food_items and customer_reservations are in place");
    Ok(())
}

pub async fn restaurant_names(conn: &mut AsyncPgConnection) -> Result<HashSet<String>> {
    let names = food_items::table
        .select(food_items::restaurant_name)
        .load::<String>(conn)
        .await?;
    Ok(names.into_iter().collect())
}

pub async fn reservation_keys(conn: &mut AsyncPgConnection) -> Result<HashSet<ReservationKey>> {
    let reservations = customer_reservations::table
        .load::<Reservation>(conn)
        .await?;
    Ok(reservations.iter().map(Reservation::key).collect())
}

async fn upsert_listing(
    conn: &mut AsyncPgConnection,
    listing: &FoodListing,
    merge: FoodMerge,
) -> QueryResult<usize> {
    let row = NewFoodItem::from(listing);
    let insert = diesel::insert_into(food_items::table).values(&row);
    let target = (food_items::restaurant_name, food_items::food_type);

    match merge {
        FoodMerge::BagCount => {
            insert
                .on_conflict(target)
                .do_update()
                .set(food_items::number_of_bags.eq(excluded(food_items::number_of_bags)))
                .execute(conn)
                .await
        }
        FoodMerge::Listing => {
            insert
                .on_conflict(target)
                .do_update()
                .set((
                    food_items::number_of_bags.eq(excluded(food_items::number_of_bags)),
                    food_items::original_price.eq(excluded(food_items::original_price)),
                    food_items::reduced_price.eq(excluded(food_items::reduced_price)),
                    food_items::comments.eq(excluded(food_items::comments)),
                    food_items::cuisine.eq(excluded(food_items::cuisine)),
                ))
                .execute(conn)
                .await
        }
        FoodMerge::Keep => insert.on_conflict(target).do_nothing().execute(conn).await,
    }
}

/// Writes every listing inside one transaction; the set commits after the
/// last row.
pub async fn upsert_food(
    conn: &mut AsyncPgConnection,
    listings: &[FoodListing],
    merge: FoodMerge,
) -> Result<usize> {
    let affected = conn
        .transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                let mut affected = 0;
                for listing in listings {
                    affected += upsert_listing(conn, listing, merge)
                        .await
                        .with_context(|| format!("Failed to upsert listing for {}", listing.restaurant_name))?;
                }
                Ok(affected)
            })
        })
        .await?;

    info!("Upserted {} of {} food listings ({})", affected, listings.len(), merge);
    Ok(affected)
}

pub async fn insert_reservations(
    conn: &mut AsyncPgConnection,
    reservations: &[ReservationRequest],
) -> Result<usize> {
    let inserted = conn
        .transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                let mut inserted = 0;
                for reservation in reservations {
                    inserted += diesel::insert_into(customer_reservations::table)
                        .values(&NewReservation::from(reservation))
                        .on_conflict((
                            customer_reservations::email,
                            customer_reservations::phone_number,
                            customer_reservations::rest_name,
                        ))
                        .do_nothing()
                        .execute(conn)
                        .await
                        .with_context(|| format!("Failed to insert reservation for {}", reservation.email))?;
                }
                Ok(inserted)
            })
        })
        .await?;

    info!(
        "Inserted {} of {} reservations, {} already known",
        inserted,
        reservations.len(),
        reservations.len() - inserted
    );
    Ok(inserted)
}

/// Takes one bag for a reservation at `restaurant`, then drops that
/// restaurant's exhausted listings. Rows already at zero are never
/// decremented. Returns (rows decremented, rows deleted).
async fn draw_bag(
    conn: &mut AsyncPgConnection,
    restaurant: &str,
    scope: DecrementScope,
) -> QueryResult<(usize, usize)> {
    let decremented = match scope {
        DecrementScope::Restaurant => {
            diesel::update(
                food_items::table
                    .filter(food_items::restaurant_name.eq(restaurant))
                    .filter(food_items::number_of_bags.gt(0)),
            )
            .set(food_items::number_of_bags.eq(food_items::number_of_bags - 1))
            .execute(conn)
            .await?
        }
        DecrementScope::SingleListing => {
            let target = food_items::table
                .filter(food_items::restaurant_name.eq(restaurant))
                .filter(food_items::number_of_bags.gt(0))
                .select(food_items::id)
                .order(food_items::id.asc())
                .first::<i32>(conn)
                .await
                .optional()?;

            match target {
                Some(id) => {
                    diesel::update(food_items::table.filter(food_items::id.eq(id)))
                        .set(food_items::number_of_bags.eq(food_items::number_of_bags - 1))
                        .execute(conn)
                        .await?
                }
                None => 0,
            }
        }
    };

    let deleted = diesel::delete(
        food_items::table
            .filter(food_items::restaurant_name.eq(restaurant))
            .filter(food_items::number_of_bags.le(0)),
    )
    .execute(conn)
    .await?;

    debug!(restaurant, decremented, deleted, "Applied reservation");
    Ok((decremented, deleted))
}

/// Applies every unprocessed reservation to inventory and marks exactly those
/// reservations processed, all in one transaction.
pub async fn reconcile(conn: &mut AsyncPgConnection, scope: DecrementScope) -> Result<ReconcileReport> {
    let report = conn
        .transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                let pending = customer_reservations::table
                    .filter(customer_reservations::processed.eq(false))
                    .select((customer_reservations::id, customer_reservations::rest_name))
                    .order(customer_reservations::id.asc())
                    .load::<(i32, String)>(conn)
                    .await?;

                let mut report = ReconcileReport::default();
                for (_, restaurant) in &pending {
                    let (decremented, deleted) = draw_bag(conn, restaurant, scope).await?;
                    report.decremented += decremented;
                    report.deleted += deleted;
                }

                let ids: Vec<i32> = pending.iter().map(|(id, _)| *id).collect();
                report.reservations = diesel::update(
                    customer_reservations::table.filter(customer_reservations::id.eq_any(ids)),
                )
                .set(customer_reservations::processed.eq(true))
                .execute(conn)
                .await?;

                Ok(report)
            })
        })
        .await?;

    info!(
        "Processed {} reservations: {} listings decremented, {} removed ({})",
        report.reservations, report.decremented, report.deleted, scope
    );
    Ok(report)
}

/// Applies a single reservation if it is still unprocessed. A reservation
/// posted again after it was applied takes no further bag.
pub async fn reconcile_one(
    conn: &mut AsyncPgConnection,
    key: &ReservationKey,
    scope: DecrementScope,
) -> Result<ReconcileReport> {
    conn.transaction::<_, anyhow::Error, _>(|conn| {
        Box::pin(async move {
            let marked = diesel::update(
                customer_reservations::table
                    .filter(customer_reservations::email.eq(key.email.as_str()))
                    .filter(customer_reservations::phone_number.eq(key.phone_number.as_str()))
                    .filter(customer_reservations::rest_name.eq(key.restaurant_name.as_str()))
                    .filter(customer_reservations::processed.eq(false)),
            )
            .set(customer_reservations::processed.eq(true))
            .execute(conn)
            .await?;

            if marked == 0 {
                return Ok(ReconcileReport::default());
            }

            let (decremented, deleted) = draw_bag(conn, &key.restaurant_name, scope).await?;
            Ok(ReconcileReport {
                reservations: marked,
                decremented,
                deleted,
            })
        })
    })
    .await
}

pub async fn missing_coordinates(conn: &mut AsyncPgConnection) -> Result<Vec<(i32, String)>> {
    let rows = food_items::table
        .filter(
            food_items::latitude
                .is_null()
                .or(food_items::longitude.is_null()),
        )
        .select((food_items::id, food_items::location))
        .order(food_items::id.asc())
        .load::<(i32, String)>(conn)
        .await?;
    Ok(rows)
}

pub async fn set_coordinates(conn: &mut AsyncPgConnection, id: i32, at: Coordinates) -> Result<()> {
    diesel::update(food_items::table.filter(food_items::id.eq(id)))
        .set((
            food_items::latitude.eq(at.latitude),
            food_items::longitude.eq(at.longitude),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn locate_listing(
    conn: &mut AsyncPgConnection,
    restaurant: &str,
    food_type: &str,
    at: Coordinates,
) -> Result<usize> {
    let updated = diesel::update(
        food_items::table
            .filter(food_items::restaurant_name.eq(restaurant))
            .filter(food_items::food_type.eq(food_type)),
    )
    .set((
        food_items::latitude.eq(at.latitude),
        food_items::longitude.eq(at.longitude),
    ))
    .execute(conn)
    .await?;
    Ok(updated)
}

/// Listings that have been geocoded and hold at least `min_bags` bags.
pub async fn located_listings(conn: &mut AsyncPgConnection, min_bags: Option<i32>) -> Result<Vec<FoodItem>> {
    let mut query = food_items::table
        .filter(food_items::latitude.is_not_null())
        .filter(food_items::longitude.is_not_null())
        .order(food_items::id.asc())
        .into_boxed();

    if let Some(min) = min_bags {
        query = query.filter(food_items::number_of_bags.ge(min));
    }

    Ok(query.load::<FoodItem>(conn).await?)
}
