use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{Coordinates, FoodListing, ReservationKey, ReservationRequest};

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::food_items)]
pub struct FoodItem {
    pub id: i32,
    pub restaurant_name: String,
    pub location: String,
    pub food_type: String,
    pub cuisine: Option<String>,
    pub original_price: Option<BigDecimal>,
    pub reduced_price: Option<BigDecimal>,
    pub number_of_bags: i32,
    pub comments: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl FoodItem {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::food_items)]
pub struct NewFoodItem {
    pub restaurant_name: String,
    pub location: String,
    pub food_type: String,
    pub cuisine: Option<String>,
    pub original_price: Option<BigDecimal>,
    pub reduced_price: Option<BigDecimal>,
    pub number_of_bags: i32,
    pub comments: String,
}

impl From<&FoodListing> for NewFoodItem {
    fn from(listing: &FoodListing) -> Self {
        Self {
            restaurant_name: listing.restaurant_name.clone(),
            location: listing.location.clone(),
            food_type: listing.food_type.clone(),
            cuisine: listing.cuisine.clone(),
            original_price: listing.original_price.clone(),
            reduced_price: listing.reduced_price.clone(),
            number_of_bags: listing.number_of_bags,
            comments: listing.comments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::customer_reservations)]
pub struct Reservation {
    pub id: i32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub rest_name: String,
    pub processed: bool,
}

impl Reservation {
    pub fn key(&self) -> ReservationKey {
        ReservationKey {
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            restaurant_name: self.rest_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::customer_reservations)]
pub struct NewReservation {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub rest_name: String,
    pub processed: bool,
}

impl From<&ReservationRequest> for NewReservation {
    fn from(request: &ReservationRequest) -> Self {
        Self {
            first_name: request.first_name.clone(),
            last_name: request.last_name.clone(),
            email: request.email.clone(),
            phone_number: request.phone_number.clone(),
            rest_name: request.restaurant_name.clone(),
            processed: false,
        }
    }
}
