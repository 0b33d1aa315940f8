//! Geodesic helpers shared by deduplication and the location-aware sources.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Metres in one statute mile.
pub const METRES_PER_MILE: f64 = 1_609.344;

/// A WGS-84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Build a point from raw coordinates, treating `(0, 0)` and non-finite
    /// values as "no fix".
    pub fn from_raw(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() || (lat == 0.0 && lon == 0.0) {
            None
        } else {
            Some(Self { lat, lon })
        }
    }

    /// Great-circle distance to `other` in metres.
    ///
    /// ```
    /// use roadwise_types::GeoPoint;
    ///
    /// let miami = GeoPoint::new(25.7617, -80.1918);
    /// let fort_lauderdale = GeoPoint::new(26.1224, -80.1373);
    /// let d = miami.distance_m(&fort_lauderdale);
    /// assert!((d - 40_500.0).abs() < 1_000.0);
    /// ```
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self, other)
    }
}

/// Haversine distance between two points in metres.
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

pub fn miles_to_metres(miles: f64) -> f64 {
    miles * METRES_PER_MILE
}

pub fn metres_to_miles(metres: f64) -> f64 {
    metres / METRES_PER_MILE
}
