//! Florida 511 traffic events.
//!
//! The feed returns every active event statewide in one response, so the
//! client caches a single payload and nearby filtering happens locally.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roadwise_types::GeoPoint;
use serde::Deserialize;
use tracing::debug;

use crate::cache::{CachedClient, RemoteSource, SourcePolicy};
use crate::nearby::Located;
use crate::{SourceError, http_client, lenient_f64, lenient_string};

pub const DEFAULT_URL: &str = "https://fl511.com/api/getevents";

/// 30 s TTL; the feed allows 10 calls per minute.
pub fn default_policy() -> SourcePolicy {
    SourcePolicy::new(30, 10, 60, 5)
}

// ─────────────────────────────────────────────────────────────────────────────
// Event model
// ─────────────────────────────────────────────────────────────────────────────

/// Severity tiers reported by the feed, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventSeverity {
    Critical,
    Major,
    Moderate,
    Minor,
    Unknown,
}

impl EventSeverity {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Critical" => Self::Critical,
            "Major" => Self::Major,
            "Moderate" => Self::Moderate,
            "Minor" => Self::Minor,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::Major => "Major",
            Self::Moderate => "Moderate",
            Self::Minor => "Minor",
            Self::Unknown => "Unknown",
        }
    }
}

/// One traffic event as published by the feed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TrafficEvent {
    #[serde(rename = "ID", deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub latitude: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub longitude: f64,
    #[serde(deserialize_with = "lenient_string")]
    pub roadway_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub direction_of_travel: String,
    /// e.g. `accidentsAndIncidents`, `roadwork`, `closures`.
    #[serde(deserialize_with = "lenient_string")]
    pub event_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub severity: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub location: String,
}

impl TrafficEvent {
    pub fn severity(&self) -> EventSeverity {
        EventSeverity::parse(&self.severity)
    }

    /// Event types that warrant slowing down.
    pub fn is_slowdown(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            "accidentsAndIncidents" | "roadwork" | "closures" | "winterDrivingIndex"
        )
    }

    pub fn is_closure(&self) -> bool {
        self.event_type == "closures"
    }

    /// Driver-facing label for the event type.
    pub fn type_label(&self) -> &'static str {
        match self.event_type.as_str() {
            "accidentsAndIncidents" => "Accident",
            "roadwork" => "Road work",
            "closures" => "Road closure",
            "specialEvents" => "Special event",
            "winterDrivingIndex" => "Weather hazard",
            _ => "Traffic event",
        }
    }
}

impl Located for TrafficEvent {
    fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_raw(self.latitude, self.longitude)
    }

    fn direction(&self) -> Option<&str> {
        Some(&self.direction_of_travel)
    }

    fn corridor(&self) -> Option<&str> {
        Some(&self.roadway_name)
    }
}

/// Parse a feed response.  Anything but a JSON array is malformed.
pub fn parse_events(body: serde_json::Value) -> Result<Vec<TrafficEvent>, SourceError> {
    match body {
        serde_json::Value::Array(_) => serde_json::from_value(body)
            .map_err(|e| SourceError::BadResponse(format!("fl511 events: {e}"))),
        other => Err(SourceError::BadResponse(format!(
            "fl511: expected array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source
// ─────────────────────────────────────────────────────────────────────────────

/// FL511 events feed.  Requires an API key.
pub struct Fl511Source {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl Fl511Source {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_url(DEFAULT_URL, api_key)
    }

    pub fn with_url(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client: http_client(Duration::from_secs(5)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl RemoteSource for Fl511Source {
    type Key = ();
    type Payload = Arc<Vec<TrafficEvent>>;

    fn name(&self) -> &str {
        "fl511"
    }

    async fn fetch_remote(&self, _key: &()) -> Result<Self::Payload, SourceError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SourceError::NotConfigured("FL511 API key".into()))?;
        let body: serde_json::Value = self
            .client
            .get(&self.base_url)
            .query(&[("key", key.trim()), ("format", "json")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let events = parse_events(body)?;
        debug!(count = events.len(), "fl511 events fetched");
        Ok(Arc::new(events))
    }
}

/// Shared, cached FL511 client.
pub type Fl511Client = CachedClient<Fl511Source>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nearby::{NearbyFilter, filter_nearby};
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!([
            {
                "ID": 101,
                "Latitude": 25.79,
                "Longitude": "-80.21",
                "RoadwayName": "I-95",
                "DirectionOfTravel": "Northbound",
                "EventType": "accidentsAndIncidents",
                "Severity": "Major",
                "Description": "Crash blocking 2 right lanes",
                "Location": "at NW 62nd St"
            },
            {
                "ID": "x-7",
                "Latitude": 0,
                "Longitude": 0,
                "EventType": "roadwork"
            },
            {
                "ID": 102,
                "Latitude": 25.9,
                "Longitude": -80.2,
                "RoadwayName": "SR-826",
                "DirectionOfTravel": null,
                "EventType": "specialEvents",
                "Severity": "Minor"
            }
        ])
    }

    #[test]
    fn parses_mixed_field_types() {
        let events = parse_events(sample()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].id, "101");
        assert_eq!(events[0].longitude, -80.21);
        assert_eq!(events[2].direction_of_travel, "");
        assert_eq!(events[1].severity(), EventSeverity::Unknown);
    }

    #[test]
    fn non_array_body_is_malformed() {
        let err = parse_events(json!({"error": "bad key"})).unwrap_err();
        assert!(matches!(err, SourceError::BadResponse(_)));
    }

    #[test]
    fn zero_coordinates_are_skipped_by_nearby_filter() {
        let events = parse_events(sample()).unwrap();
        let hits = filter_nearby(
            &events,
            &GeoPoint::new(25.8, -80.2),
            &NearbyFilter::within_miles(50.0),
        );
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item.id, "101");
    }

    #[test]
    fn severity_orders_most_severe_first() {
        assert!(EventSeverity::Critical < EventSeverity::Major);
        assert!(EventSeverity::Minor < EventSeverity::Unknown);
        assert_eq!(EventSeverity::parse("Bogus"), EventSeverity::Unknown);
    }

    #[test]
    fn slowdown_types_and_labels() {
        let mut ev = TrafficEvent {
            event_type: "closures".into(),
            ..TrafficEvent::default()
        };
        assert!(ev.is_slowdown());
        assert!(ev.is_closure());
        assert_eq!(ev.type_label(), "Road closure");
        ev.event_type = "specialEvents".into();
        assert!(!ev.is_slowdown());
        assert_eq!(ev.type_label(), "Special event");
    }

    #[tokio::test]
    async fn unconfigured_source_refuses_to_fetch() {
        let source = Fl511Source::new(Some("   ".into()));
        assert!(!source.is_configured());
        let err = source.fetch_remote(&()).await.unwrap_err();
        assert!(matches!(err, SourceError::NotConfigured(_)));
    }
}
