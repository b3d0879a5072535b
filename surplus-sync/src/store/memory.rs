use anyhow::{bail, Result};
use async_trait::async_trait;
use shared::{
    Coordinates, DecrementScope, FoodListing, FoodMerge, ReconcileReport, ReservationKey,
    ReservationRequest,
};
use std::collections::HashSet;

use super::SurplusStore;
use crate::models::{FoodItem, Reservation};

/// In-process stand-in for `PgStore` with the same conflict and
/// reconciliation rules.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub tables_exist: bool,
    pub food: Vec<FoodItem>,
    pub reservations: Vec<Reservation>,
    next_id: i32,
}

impl MemoryStore {
    pub fn with_tables() -> Self {
        Self {
            tables_exist: true,
            ..Self::default()
        }
    }

    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn require_tables(&self) -> Result<()> {
        if !self.tables_exist {
            bail!("relation \"food_items\" does not exist");
        }
        Ok(())
    }

    pub fn listing(&self, restaurant: &str, food_type: &str) -> Option<&FoodItem> {
        self.food
            .iter()
            .find(|item| item.restaurant_name == restaurant && item.food_type == food_type)
    }

    pub fn push_listing(&mut self, restaurant: &str, food_type: &str, bags: i32) {
        let id = self.next_id();
        self.food.push(FoodItem {
            id,
            restaurant_name: restaurant.to_string(),
            location: String::new(),
            food_type: food_type.to_string(),
            cuisine: None,
            original_price: None,
            reduced_price: None,
            number_of_bags: bags,
            comments: String::new(),
            latitude: None,
            longitude: None,
        });
    }

    fn draw_bag(&mut self, restaurant: &str, scope: DecrementScope) -> (usize, usize) {
        let mut decremented = 0;
        for item in self
            .food
            .iter_mut()
            .filter(|item| item.restaurant_name == restaurant && item.number_of_bags > 0)
        {
            item.number_of_bags -= 1;
            decremented += 1;
            if scope == DecrementScope::SingleListing {
                break;
            }
        }

        let before = self.food.len();
        self.food
            .retain(|item| !(item.restaurant_name == restaurant && item.number_of_bags <= 0));
        (decremented, before - self.food.len())
    }
}

#[async_trait]
impl SurplusStore for MemoryStore {
    async fn reset(&mut self) -> Result<()> {
        self.tables_exist = false;
        self.food.clear();
        self.reservations.clear();
        Ok(())
    }

    async fn ensure(&mut self) -> Result<()> {
        self.tables_exist = true;
        Ok(())
    }

    async fn restaurant_names(&mut self) -> Result<HashSet<String>> {
        self.require_tables()?;
        Ok(self.food.iter().map(|item| item.restaurant_name.clone()).collect())
    }

    async fn reservation_keys(&mut self) -> Result<HashSet<ReservationKey>> {
        self.require_tables()?;
        Ok(self.reservations.iter().map(Reservation::key).collect())
    }

    async fn upsert_food(&mut self, listings: &[FoodListing], merge: FoodMerge) -> Result<usize> {
        self.require_tables()?;
        let mut affected = 0;
        for listing in listings {
            let existing = self.food.iter_mut().find(|item| {
                item.restaurant_name == listing.restaurant_name && item.food_type == listing.food_type
            });
            match (existing, merge) {
                (Some(_), FoodMerge::Keep) => {}
                (Some(item), FoodMerge::BagCount) => {
                    item.number_of_bags = listing.number_of_bags;
                    affected += 1;
                }
                (Some(item), FoodMerge::Listing) => {
                    item.number_of_bags = listing.number_of_bags;
                    item.original_price = listing.original_price.clone();
                    item.reduced_price = listing.reduced_price.clone();
                    item.comments = listing.comments.clone();
                    item.cuisine = listing.cuisine.clone();
                    affected += 1;
                }
                (None, _) => {
                    let id = self.next_id();
                    self.food.push(FoodItem {
                        id,
                        restaurant_name: listing.restaurant_name.clone(),
                        location: listing.location.clone(),
                        food_type: listing.food_type.clone(),
                        cuisine: listing.cuisine.clone(),
                        original_price: listing.original_price.clone(),
                        reduced_price: listing.reduced_price.clone(),
                        number_of_bags: listing.number_of_bags,
                        comments: listing.comments.clone(),
                        latitude: None,
                        longitude: None,
                    });
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    async fn insert_reservations(&mut self, reservations: &[ReservationRequest]) -> Result<usize> {
        self.require_tables()?;
        let mut inserted = 0;
        for request in reservations {
            let key = request.key();
            if self.reservations.iter().any(|r| r.key() == key) {
                continue;
            }
            let id = self.next_id();
            self.reservations.push(Reservation {
                id,
                first_name: request.first_name.clone(),
                last_name: request.last_name.clone(),
                email: request.email.clone(),
                phone_number: request.phone_number.clone(),
                rest_name: request.restaurant_name.clone(),
                processed: false,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn reconcile(&mut self, scope: DecrementScope) -> Result<ReconcileReport> {
        self.require_tables()?;
        let pending: Vec<(i32, String)> = self
            .reservations
            .iter()
            .filter(|r| !r.processed)
            .map(|r| (r.id, r.rest_name.clone()))
            .collect();

        let mut report = ReconcileReport::default();
        for (_, restaurant) in &pending {
            let (decremented, deleted) = self.draw_bag(restaurant, scope);
            report.decremented += decremented;
            report.deleted += deleted;
        }

        for reservation in &mut self.reservations {
            if pending.iter().any(|(id, _)| *id == reservation.id) {
                reservation.processed = true;
                report.reservations += 1;
            }
        }
        Ok(report)
    }

    async fn missing_coordinates(&mut self) -> Result<Vec<(i32, String)>> {
        self.require_tables()?;
        Ok(self
            .food
            .iter()
            .filter(|item| item.latitude.is_none() || item.longitude.is_none())
            .map(|item| (item.id, item.location.clone()))
            .collect())
    }

    async fn set_coordinates(&mut self, id: i32, at: Coordinates) -> Result<()> {
        if let Some(item) = self.food.iter_mut().find(|item| item.id == id) {
            item.latitude = Some(at.latitude);
            item.longitude = Some(at.longitude);
        }
        Ok(())
    }

    async fn locate_listing(&mut self, restaurant: &str, food_type: &str, at: Coordinates) -> Result<usize> {
        self.require_tables()?;
        let mut updated = 0;
        for item in self
            .food
            .iter_mut()
            .filter(|item| item.restaurant_name == restaurant && item.food_type == food_type)
        {
            item.latitude = Some(at.latitude);
            item.longitude = Some(at.longitude);
            updated += 1;
        }
        Ok(updated)
    }
}
