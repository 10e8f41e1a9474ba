use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical postal code key used for every join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pincode(pub u32);

impl Pincode {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pincode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u32> for Pincode {
    fn from(value: u32) -> Self {
        Pincode(value)
    }
}

/// Decimal degrees. Latitude and longitude only ever travel together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coordinate { lat, lon }
    }
}

/// One cleaned customer address row.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRecord {
    pub pincode: Pincode,
    pub raw_city: Option<String>,
    pub raw_state: Option<String>,
    pub registration_date: Option<NaiveDate>,
}

impl AddressRecord {
    pub fn year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.registration_date.map(|date| date.year())
    }
}

/// Which fetch batch produced a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    pub batch_id: Uuid,
    pub resolved_at: NaiveDateTime,
}

/// Persisted resolution of a single pincode.
#[derive(Debug, Clone, PartialEq)]
pub struct PincodeLocation {
    pub pincode: Pincode,
    pub coordinate: Option<Coordinate>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub formatted_address: Option<String>,
    pub provenance: Option<Provenance>,
}

impl PincodeLocation {
    pub fn new(pincode: Pincode, coordinate: Coordinate) -> Self {
        PincodeLocation {
            pincode,
            coordinate: Some(coordinate),
            city: None,
            state: None,
            formatted_address: None,
            provenance: None,
        }
    }

    pub fn with_locality(mut self, city: Option<&str>, state: Option<&str>) -> Self {
        self.city = non_blank(city);
        self.state = non_blank(state);
        self
    }
}

/// Per-pincode rollup handed to the rendering and reporting side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PincodeSummary {
    pub pincode: Pincode,
    pub customer_count: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub dominant_city: Option<String>,
    pub dominant_state: Option<String>,
    pub percentage: f64,
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
