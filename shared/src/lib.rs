use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One spreadsheet row keyed by its header label.
pub type SheetRecord = BTreeMap<String, Value>;

pub mod columns {
    pub const RESTAURANT_NAME: &str = "Restaurant/food store name";
    pub const ADDRESS: &str = "Adress (street address, city, state, postal code)";
    pub const FOOD_TYPE: &str = "What foods do you give out?";
    pub const ORIGINAL_COST: &str = "Original cost";
    pub const REDUCED_COST: &str = "Reduced cost";
    pub const BAG_COUNT: &str = "Number of suprise bags";
    pub const COMMENTS: &str = "Comments";
    pub const CUISINE: &str = "Cuisine";

    pub const FIRST_NAME: &str = "First Name";
    pub const LAST_NAME: &str = "Last Name";
    pub const EMAIL: &str = "Email";
    pub const PHONE_NUMBER: &str = "Phone Number";
    pub const RESERVED_RESTAURANT: &str = "Restaurant Name";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing column \"{0}\"")]
    MissingColumn(String),
    #[error("invalid value {value} in column \"{column}\"")]
    InvalidValue { column: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodListing {
    pub restaurant_name: String,
    pub location: String,
    pub food_type: String,
    pub cuisine: Option<String>,
    pub original_price: Option<BigDecimal>,
    pub reduced_price: Option<BigDecimal>,
    pub number_of_bags: i32,
    pub comments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub restaurant_name: String,
}

/// Identity of a reservation: one person, one restaurant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationKey {
    pub email: String,
    pub phone_number: String,
    pub restaurant_name: String,
}

impl FoodListing {
    pub fn from_record(record: &SheetRecord) -> Result<Self, RecordError> {
        let cuisine = match record.get(columns::CUISINE) {
            Some(value) => Some(cell_text(value)).filter(|c| !c.is_empty()),
            None => None,
        };

        Ok(Self {
            restaurant_name: text(record, columns::RESTAURANT_NAME)?,
            location: text(record, columns::ADDRESS)?,
            food_type: text(record, columns::FOOD_TYPE)?,
            cuisine,
            original_price: price(record, columns::ORIGINAL_COST)?,
            reduced_price: price(record, columns::REDUCED_COST)?,
            number_of_bags: bag_count(record, columns::BAG_COUNT)?,
            comments: text(record, columns::COMMENTS)?,
        })
    }
}

impl ReservationRequest {
    pub fn from_record(record: &SheetRecord) -> Result<Self, RecordError> {
        Ok(Self {
            first_name: text(record, columns::FIRST_NAME)?,
            last_name: text(record, columns::LAST_NAME)?,
            email: text(record, columns::EMAIL)?,
            phone_number: text(record, columns::PHONE_NUMBER)?,
            restaurant_name: text(record, columns::RESERVED_RESTAURANT)?,
        })
    }

    pub fn key(&self) -> ReservationKey {
        ReservationKey {
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            restaurant_name: self.restaurant_name.clone(),
        }
    }
}

pub fn parse_records<T>(
    records: &[SheetRecord],
    parse: fn(&SheetRecord) -> Result<T, RecordError>,
) -> Result<Vec<T>, RecordError> {
    records.iter().map(parse).collect()
}

fn cell<'a>(record: &'a SheetRecord, column: &str) -> Result<&'a Value, RecordError> {
    record
        .get(column)
        .ok_or_else(|| RecordError::MissingColumn(column.to_string()))
}

fn invalid(column: &str, value: &Value) -> RecordError {
    RecordError::InvalidValue {
        column: column.to_string(),
        value: value.to_string(),
    }
}

/// Renders a cell as text. Integral numbers lose their fractional part so a
/// phone number authored as 5551234567 does not become "5551234567.0".
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string().to_uppercase(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn text(record: &SheetRecord, column: &str) -> Result<String, RecordError> {
    cell(record, column).map(cell_text)
}

fn price(record: &SheetRecord, column: &str) -> Result<Option<BigDecimal>, RecordError> {
    let value = cell(record, column)?;
    let raw = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.strip_prefix('$').unwrap_or(trimmed).trim().to_string()
        }
        _ => return Err(invalid(column, value)),
    };

    if raw.is_empty() {
        return Ok(None);
    }

    BigDecimal::from_str(&raw)
        .map(Some)
        .map_err(|_| invalid(column, value))
}

fn bag_count(record: &SheetRecord, column: &str) -> Result<i32, RecordError> {
    let value = cell(record, column)?;
    let count = match value {
        Value::Null => Some(0),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_i32(),
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .and_then(|f| f.to_i32()),
        },
        Value::String(s) if s.trim().is_empty() => Some(0),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    };

    match count {
        Some(n) if n >= 0 => Ok(n),
        _ => Err(invalid(column, value)),
    }
}

/// True when at least one incoming listing names a restaurant the store has
/// never seen. Only the restaurant name counts; changed prices or counts on a
/// known restaurant are not novelty.
pub fn has_new_food(records: &[FoodListing], stored: &HashSet<String>) -> bool {
    records
        .iter()
        .any(|record| !stored.contains(&record.restaurant_name))
}

pub fn has_new_reservation(records: &[ReservationRequest], stored: &HashSet<ReservationKey>) -> bool {
    records.iter().any(|record| !stored.contains(&record.key()))
}

/// What an identity conflict on `food_items` overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FoodMerge {
    /// Refresh the bag count only; prices and address keep their first values.
    #[default]
    BagCount,
    /// Refresh bag count, prices, comments and cuisine.
    Listing,
    /// Leave the stored row untouched.
    Keep,
}

/// Which listings one reservation draws a bag from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecrementScope {
    /// Every listing of the reserved restaurant loses one bag.
    #[default]
    Restaurant,
    /// Only the oldest listing of the restaurant that still has bags.
    SingleListing,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} \"{value}\", expected one of: {expected}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl FromStr for FoodMerge {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bag-count" => Ok(FoodMerge::BagCount),
            "listing" => Ok(FoodMerge::Listing),
            "keep" => Ok(FoodMerge::Keep),
            _ => Err(UnknownVariant {
                kind: "food merge strategy",
                value: s.to_string(),
                expected: "bag-count, listing, keep",
            }),
        }
    }
}

impl fmt::Display for FoodMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FoodMerge::BagCount => "bag-count",
            FoodMerge::Listing => "listing",
            FoodMerge::Keep => "keep",
        })
    }
}

impl FromStr for DecrementScope {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restaurant" => Ok(DecrementScope::Restaurant),
            "single-listing" => Ok(DecrementScope::SingleListing),
            _ => Err(UnknownVariant {
                kind: "decrement scope",
                value: s.to_string(),
                expected: "restaurant, single-listing",
            }),
        }
    }
}

impl fmt::Display for DecrementScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecrementScope::Restaurant => "restaurant",
            DecrementScope::SingleListing => "single-listing",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub reservations: usize,
    pub decremented: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Great-circle distance in miles (spherical law of cosines).
pub fn distance_miles(a: Coordinates, b: Coordinates) -> f64 {
    let (lat_a, lat_b) = (a.latitude.to_radians(), b.latitude.to_radians());
    let delta_lng = (b.longitude - a.longitude).to_radians();
    let cos_angle = lat_a.sin() * lat_b.sin() + lat_a.cos() * lat_b.cos() * delta_lng.cos();
    EARTH_RADIUS_MILES * cos_angle.clamp(-1.0, 1.0).acos()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Invalid distance, latitude, or longitude parameters")]
    InvalidDistance,
    #[error("Invalid availability parameter")]
    InvalidAvailability,
}

/// Search over located listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFilter {
    pub cuisines: Vec<String>,
    pub min_bags: Option<i32>,
    pub within: Option<(Coordinates, f64)>,
}

impl ListingFilter {
    pub fn parse(
        cuisine: Option<&str>,
        availability: Option<&str>,
        distance: Option<&str>,
        lat: Option<&str>,
        lng: Option<&str>,
    ) -> Result<Self, FilterError> {
        let cuisines = cuisine
            .map(|list| {
                list.split(',')
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let min_bags = match availability.map(str::trim).filter(|a| !a.is_empty()) {
            Some(a) => Some(a.parse::<i32>().map_err(|_| FilterError::InvalidAvailability)?),
            None => None,
        };

        let within = match (distance, lat, lng) {
            (Some(distance), Some(lat), Some(lng)) if distance != "Any" => {
                let parse = |v: &str| v.trim().parse::<f64>().ok().filter(|f| f.is_finite());
                match (parse(distance), parse(lat), parse(lng)) {
                    (Some(distance), Some(latitude), Some(longitude)) => {
                        Some((Coordinates { latitude, longitude }, distance))
                    }
                    _ => return Err(FilterError::InvalidDistance),
                }
            }
            _ => None,
        };

        Ok(Self {
            cuisines,
            min_bags,
            within,
        })
    }

    /// A listing whose cuisine is "All" matches any cuisine filter.
    pub fn matches_cuisine(&self, cuisine: Option<&str>) -> bool {
        if self.cuisines.is_empty() {
            return true;
        }
        let Some(cuisine) = cuisine.map(str::to_lowercase) else {
            return false;
        };
        cuisine == "all" || self.cuisines.iter().any(|wanted| cuisine.contains(wanted.as_str()))
    }

    pub fn matches_bags(&self, bags: i32) -> bool {
        self.min_bags.map_or(true, |min| bags >= min)
    }

    /// Distance from the search origin, or `None` when the listing is out of
    /// range. `Some(None)` means no distance filter applies.
    pub fn distance_to(&self, at: Coordinates) -> Option<Option<f64>> {
        match self.within {
            None => Some(None),
            Some((origin, limit)) => {
                let miles = distance_miles(origin, at);
                (miles <= limit).then_some(Some(miles))
            }
        }
    }
}
