//! National Weather Service active alerts for a point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roadwise_types::AlertSeverity;
use serde::Deserialize;
use tracing::debug;

use crate::cache::{CachedClient, RemoteSource, SourcePolicy};
use crate::{GridKey, SourceError, http_client, lenient_string};

pub const DEFAULT_URL: &str = "https://api.weather.gov/alerts/active";

/// Alert events that may call for evacuation.
pub const EVACUATION_EVENTS: [&str; 12] = [
    "Hurricane Warning",
    "Hurricane Watch",
    "Tropical Storm Warning",
    "Tropical Storm Watch",
    "Storm Surge Warning",
    "Storm Surge Watch",
    "Flood Warning",
    "Flash Flood Warning",
    "Tornado Warning",
    "Extreme Wind Warning",
    "Coastal Flood Warning",
    "Tsunami Warning",
];

const TEXT_MAX_CHARS: usize = 500;

/// Keys are snapped to two decimals (~1 km).
pub fn key_for(point: roadwise_types::GeoPoint) -> GridKey {
    GridKey::new(point, 2)
}

pub fn default_policy() -> SourcePolicy {
    SourcePolicy::new(60, 30, 60, 5)
}

/// A simplified active alert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherAlert {
    pub event: String,
    /// `Extreme`, `Severe`, `Moderate`, `Minor` or `Unknown`.
    pub severity: String,
    pub urgency: String,
    pub headline: String,
    pub description: String,
    pub instruction: String,
    pub area: String,
}

impl WeatherAlert {
    pub fn is_evacuation_relevant(&self) -> bool {
        EVACUATION_EVENTS.contains(&self.event.as_str())
    }

    /// Driver alert tier for this weather severity.
    pub fn alert_severity(&self) -> AlertSeverity {
        match self.severity.as_str() {
            "Extreme" | "Severe" => AlertSeverity::Critical,
            "Moderate" => AlertSeverity::Warning,
            _ => AlertSeverity::Info,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Feature {
    properties: Properties,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Properties {
    #[serde(deserialize_with = "lenient_string")]
    event: String,
    #[serde(deserialize_with = "lenient_string")]
    severity: String,
    #[serde(deserialize_with = "lenient_string")]
    urgency: String,
    #[serde(deserialize_with = "lenient_string")]
    headline: String,
    #[serde(deserialize_with = "lenient_string")]
    description: String,
    #[serde(deserialize_with = "lenient_string")]
    instruction: String,
    #[serde(deserialize_with = "lenient_string")]
    area_desc: String,
}

/// Parse a GeoJSON alerts response.
pub fn parse_alerts(body: serde_json::Value) -> Result<Vec<WeatherAlert>, SourceError> {
    let fc: FeatureCollection = serde_json::from_value(body)
        .map_err(|e| SourceError::BadResponse(format!("nws alerts: {e}")))?;
    Ok(fc
        .features
        .into_iter()
        .map(|f| {
            let p = f.properties;
            WeatherAlert {
                event: p.event,
                severity: if p.severity.is_empty() {
                    "Unknown".to_string()
                } else {
                    p.severity
                },
                urgency: p.urgency,
                headline: p.headline,
                description: roadwise_types::truncate_chars(&p.description, TEXT_MAX_CHARS),
                instruction: roadwise_types::truncate_chars(&p.instruction, TEXT_MAX_CHARS),
                area: p.area_desc,
            }
        })
        .collect())
}

/// NWS alerts API.  No key required; a `User-Agent` is mandatory.
pub struct NwsSource {
    base_url: String,
    client: reqwest::Client,
}

impl Default for NwsSource {
    fn default() -> Self {
        Self::with_url(DEFAULT_URL)
    }
}

impl NwsSource {
    pub fn with_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: http_client(Duration::from_secs(5)),
        }
    }
}

#[async_trait]
impl RemoteSource for NwsSource {
    type Key = GridKey;
    type Payload = Arc<Vec<WeatherAlert>>;

    fn name(&self) -> &str {
        "nws"
    }

    async fn fetch_remote(&self, key: &GridKey) -> Result<Self::Payload, SourceError> {
        let p = key.point();
        let point = format!("{:.4},{:.4}", p.lat, p.lon);
        let body: serde_json::Value = self
            .client
            .get(&self.base_url)
            .query(&[("point", point.as_str()), ("status", "actual")])
            .header(reqwest::header::ACCEPT, "application/geo+json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let alerts = parse_alerts(body)?;
        debug!(count = alerts.len(), "nws alerts fetched");
        Ok(Arc::new(alerts))
    }
}

pub type NwsClient = CachedClient<NwsSource>;
