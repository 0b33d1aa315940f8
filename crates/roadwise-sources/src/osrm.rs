//! Driving routes from the public OSRM demo server.

use std::time::Duration;

use async_trait::async_trait;
use roadwise_types::GeoPoint;
use roadwise_types::geo::metres_to_miles;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::{CachedClient, RemoteSource, SourcePolicy};
use crate::{GridKey, SourceError, http_client, lenient_string};

pub const DEFAULT_URL: &str = "https://router.project-osrm.org/route/v1/driving";

/// Steps kept per route.
pub const MAX_STEPS: usize = 15;

pub fn default_policy() -> SourcePolicy {
    SourcePolicy::new(60, 20, 60, 5)
}

/// Origin and destination snapped to three decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub origin: GridKey,
    pub destination: GridKey,
}

impl RouteKey {
    pub fn new(origin: GeoPoint, destination: GeoPoint) -> Self {
        Self {
            origin: GridKey::new(origin, 3),
            destination: GridKey::new(destination, 3),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_m: f64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrivingRoute {
    pub distance_m: f64,
    pub duration_s: f64,
    pub steps: Vec<RouteStep>,
}

impl DrivingRoute {
    pub fn distance_mi(&self) -> f64 {
        metres_to_miles(self.distance_m)
    }

    /// e.g. `"12.4 mi, ~18 min"`.
    pub fn summary(&self) -> String {
        format!(
            "{:.1} mi, ~{:.0} min",
            self.distance_mi(),
            (self.duration_s / 60.0).round()
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
struct RouteResponse {
    #[serde(deserialize_with = "lenient_string")]
    code: String,
    routes: Vec<RawRoute>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawRoute {
    distance: f64,
    duration: f64,
    legs: Vec<RawLeg>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawLeg {
    steps: Vec<RawStep>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawStep {
    #[serde(deserialize_with = "lenient_string")]
    name: String,
    distance: f64,
    duration: f64,
    maneuver: Maneuver,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Maneuver {
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    kind: String,
    #[serde(deserialize_with = "lenient_string")]
    modifier: String,
}

fn instruction(step: &RawStep) -> String {
    let name = step.name.trim();
    let modifier = step.maneuver.modifier.trim();
    let named = !name.is_empty();
    let mut text = match step.maneuver.kind.as_str() {
        "depart" if named => format!("Head {modifier} on {name}"),
        "depart" => format!("Depart {modifier}"),
        "arrive" => "Arrive at destination".to_string(),
        "turn" if named => format!("Turn {modifier} onto {name}"),
        "turn" => format!("Turn {modifier}"),
        "merge" if named => format!("Merge onto {name}"),
        "merge" => format!("Merge {modifier}"),
        "on ramp" | "off ramp" if named => format!("Take ramp onto {name}"),
        "on ramp" | "off ramp" => format!("Take {modifier} ramp"),
        "fork" if named => format!("Keep {modifier} onto {name}"),
        "fork" => format!("Keep {modifier}"),
        "continue" if named => format!("Continue on {name}"),
        "continue" => "Continue straight".to_string(),
        "roundabout" if named => format!("Take roundabout to {name}"),
        "roundabout" => "Take roundabout".to_string(),
        other => [other, modifier, name]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" "),
    };
    if step.distance > 0.0 {
        let miles = metres_to_miles(step.distance);
        if miles >= 1.0 {
            text.push_str(&format!(" ({miles:.1} mi)"));
        } else {
            text.push_str(&format!(" ({:.0} m)", step.distance));
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First route of a response; `None` when the router found no route.
pub fn parse_route(body: serde_json::Value) -> Result<Option<DrivingRoute>, SourceError> {
    let resp: RouteResponse = serde_json::from_value(body)
        .map_err(|e| SourceError::BadResponse(format!("osrm: {e}")))?;
    if resp.code != "Ok" {
        warn!(code = %resp.code, "osrm found no route");
        return Ok(None);
    }
    let Some(route) = resp.routes.into_iter().next() else {
        return Ok(None);
    };
    let steps = route
        .legs
        .iter()
        .flat_map(|leg| leg.steps.iter())
        .take(MAX_STEPS)
        .map(|s| RouteStep {
            instruction: instruction(s),
            distance_m: s.distance.round(),
            duration_s: s.duration.round(),
        })
        .collect();
    Ok(Some(DrivingRoute {
        distance_m: route.distance,
        duration_s: route.duration,
        steps,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Source
// ─────────────────────────────────────────────────────────────────────────────

pub struct OsrmSource {
    base_url: String,
    client: reqwest::Client,
}

impl Default for OsrmSource {
    fn default() -> Self {
        Self::with_url(DEFAULT_URL)
    }
}

impl OsrmSource {
    pub fn with_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: http_client(Duration::from_secs(5)),
        }
    }
}

#[async_trait]
impl RemoteSource for OsrmSource {
    type Key = RouteKey;
    type Payload = Option<DrivingRoute>;

    fn name(&self) -> &str {
        "osrm"
    }

    async fn fetch_remote(&self, key: &RouteKey) -> Result<Self::Payload, SourceError> {
        let (o, d) = (key.origin.point(), key.destination.point());
        let url = format!("{}/{},{};{},{}", self.base_url, o.lon, o.lat, d.lon, d.lat);
        let body: serde_json::Value = self
            .client
            .get(&url)
            .query(&[("overview", "full"), ("steps", "true"), ("geometries", "geojson")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let route = parse_route(body)?;
        if let Some(r) = &route {
            debug!(summary = %r.summary(), "osrm route fetched");
        }
        Ok(route)
    }
}

pub type OsrmClient = CachedClient<OsrmSource>;
