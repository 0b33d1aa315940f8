//! `roadwise-sources` – External Data Sources
//!
//! Every external feed the advisory pipeline consults sits behind a
//! [`CachedClient`][cache::CachedClient] so that outages, slow responses and
//! rate limits degrade to stale or empty data instead of errors.
//!
//! # Modules
//!
//! - [`cache`] – the generic TTL cache + call budget.
//! - [`nearby`] – haversine radius filtering of located items.
//! - [`fl511`] – Florida 511 traffic events.
//! - [`nws`] – National Weather Service active alerts.
//! - [`fdem`] – Florida Division of Emergency Management zones, shelters and
//!   designated evacuation routes.
//! - [`osrm`] – turn-by-turn driving routes.
//! - [`probe`] – reachability probe of the reasoning endpoint.

pub mod cache;
pub mod fdem;
pub mod fl511;
pub mod nearby;
pub mod nws;
pub mod osrm;
pub mod probe;

use std::time::Duration;

use roadwise_types::{GeoPoint, RoadwiseError};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

pub use cache::{CachedClient, Fetched, RemoteSource, SourcePolicy};
pub use nearby::{Located, Nearby, NearbyFilter, filter_nearby};

/// `User-Agent` sent to every source.
pub const USER_AGENT: &str = concat!("roadwise/", env!("CARGO_PKG_VERSION"));

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Why a remote query produced no payload.  Never surfaces past the cache.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Call budget exhausted")]
    BudgetExhausted,
    #[error("Source not configured: {0}")]
    NotConfigured(String),
}

impl SourceError {
    pub fn into_roadwise(self, source_name: &str) -> RoadwiseError {
        RoadwiseError::SourceUnavailable {
            source_name: source_name.to_string(),
            details: self.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache keys
// ─────────────────────────────────────────────────────────────────────────────

/// A position snapped to a fixed decimal grid, usable as a cache key.
///
/// ```
/// use roadwise_sources::GridKey;
/// use roadwise_types::GeoPoint;
///
/// let a = GridKey::new(GeoPoint::new(27.94612, -82.45811), 2);
/// let b = GridKey::new(GeoPoint::new(27.9461, -82.4601), 2);
/// assert_eq!(a, b);
/// assert_eq!(a.point(), GeoPoint::new(27.95, -82.46));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridKey {
    lat: i64,
    lon: i64,
    decimals: u32,
    /// Search radius in tenths of a mile, `0` when unused.
    radius_tenths_mi: i64,
}

impl GridKey {
    pub fn new(point: GeoPoint, decimals: u32) -> Self {
        let scale = 10f64.powi(decimals as i32);
        Self {
            lat: (point.lat * scale).round() as i64,
            lon: (point.lon * scale).round() as i64,
            decimals,
            radius_tenths_mi: 0,
        }
    }

    pub fn with_radius_mi(mut self, radius_mi: f64) -> Self {
        self.radius_tenths_mi = (radius_mi * 10.0).round() as i64;
        self
    }

    /// The snapped point.
    pub fn point(&self) -> GeoPoint {
        let scale = 10f64.powi(self.decimals as i32);
        GeoPoint::new(self.lat as f64 / scale, self.lon as f64 / scale)
    }

    pub fn radius_mi(&self) -> f64 {
        self.radius_tenths_mi as f64 / 10.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client with the shared user agent and a request timeout.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Accept a number, a numeric string, or null (as `0.0`).
pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }
    Ok(match Option::<Raw>::deserialize(d)? {
        Some(Raw::Num(n)) => n,
        Some(Raw::Text(s)) => s.trim().parse().unwrap_or(0.0),
        None => 0.0,
    })
}

/// Accept a string, a number rendered as text, or null (as `""`).
pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(d)? {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_key_separates_radius() {
        let p = GeoPoint::new(27.9, -82.4);
        let a = GridKey::new(p, 3).with_radius_mi(25.0);
        let b = GridKey::new(p, 3).with_radius_mi(50.0);
        assert_ne!(a, b);
        assert_eq!(a.radius_mi(), 25.0);
    }

    #[test]
    fn grid_key_handles_negative_rounding() {
        let k = GridKey::new(GeoPoint::new(-0.004, -0.006), 2);
        assert_eq!(k.point(), GeoPoint::new(-0.0, -0.01));
    }

    #[test]
    fn lenient_fields_accept_mixed_json() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(default, deserialize_with = "lenient_f64")]
            a: f64,
            #[serde(default, deserialize_with = "lenient_f64")]
            b: f64,
            #[serde(default, deserialize_with = "lenient_f64")]
            c: f64,
            #[serde(default, deserialize_with = "lenient_string")]
            s: String,
        }
        let row: Row = serde_json::from_str(r#"{"a": 1.5, "b": "2.25", "c": null, "s": 42}"#).unwrap();
        assert_eq!(row.a, 1.5);
        assert_eq!(row.b, 2.25);
        assert_eq!(row.c, 0.0);
        assert_eq!(row.s, "42");
    }

    #[test]
    fn source_error_maps_to_unavailable() {
        let err = SourceError::BudgetExhausted.into_roadwise("fl511");
        assert!(matches!(err, RoadwiseError::SourceUnavailable { .. }));
    }
}
