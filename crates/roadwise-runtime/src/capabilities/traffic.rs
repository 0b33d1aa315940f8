//! `get_traffic_ahead` – FL511 events near the vehicle.

use std::sync::Arc;

use async_trait::async_trait;
use roadwise_kernel::Action;
use roadwise_sources::fl511::{EventSeverity, Fl511Client, TrafficEvent};
use roadwise_sources::{Nearby, NearbyFilter, filter_nearby};
use roadwise_types::{
    ALERT_TEXT_MAX_CHARS, AlertCandidate, AlertSeverity, CandidateAdvisory, ContextSnapshot,
    RoadwiseError, SpeedCandidate, truncate_chars,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{input_schema, parse_args};

const NAME: &str = "get_traffic_ahead";

/// Events listed in a `check` summary.
const SUMMARY_EVENTS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TrafficMode {
    #[default]
    Check,
    Advise,
}

fn default_radius() -> f64 {
    10.0
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TrafficParams {
    #[serde(default)]
    pub action: TrafficMode,
    /// Search radius in miles (default 10).
    #[serde(default = "default_radius")]
    pub radius_miles: f64,
    /// Only events on this roadway, e.g. `I-4`.
    #[serde(default)]
    pub roadway_filter: Option<String>,
    /// Only events in this direction, e.g. `Eastbound`.
    #[serde(default)]
    pub direction_filter: Option<String>,
}

/// Response tuning per FL511 severity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityResponse {
    pub confidence: f32,
    pub alert: AlertSeverity,
    /// Fraction of the reference speed to shed.
    pub reduction: f32,
}

pub fn severity_response(severity: EventSeverity) -> SeverityResponse {
    let (confidence, alert, reduction) = match severity {
        EventSeverity::Critical => (0.9, AlertSeverity::Critical, 0.50),
        EventSeverity::Major => (0.8, AlertSeverity::Warning, 0.35),
        EventSeverity::Moderate => (0.7, AlertSeverity::Warning, 0.25),
        EventSeverity::Minor => (0.6, AlertSeverity::Info, 0.15),
        EventSeverity::Unknown => (0.5, AlertSeverity::Info, 0.10),
    };
    SeverityResponse {
        confidence,
        alert,
        reduction,
    }
}

fn info_alert(text: &str) -> CandidateAdvisory {
    CandidateAdvisory::from_capability(NAME)
        .with_alert(AlertCandidate {
            text: text.to_string(),
            severity: AlertSeverity::Info,
            confidence: 1.0,
        })
        .with_reason(text)
}

fn describe(hit: &Nearby<TrafficEvent>) -> String {
    let e = &hit.item;
    let road = if e.roadway_name.is_empty() {
        "unknown road"
    } else {
        e.roadway_name.as_str()
    };
    format!(
        "{} ({}) on {road} {} - {:.1}mi",
        e.type_label(),
        e.severity().as_str(),
        e.direction_of_travel,
        hit.distance_mi()
    )
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

/// `check`: count plus the closest few events.
pub fn check(events: &[Nearby<TrafficEvent>]) -> CandidateAdvisory {
    let text = format!("{} traffic event(s) nearby", events.len());
    let summary = events
        .iter()
        .take(SUMMARY_EVENTS)
        .map(describe)
        .collect::<Vec<_>>()
        .join("; ");
    CandidateAdvisory::from_capability(NAME)
        .with_alert(AlertCandidate {
            text: truncate_chars(&text, ALERT_TEXT_MAX_CHARS),
            severity: AlertSeverity::Info,
            confidence: 1.0,
        })
        .with_reason(format!("{text}: {summary}"))
}

/// `advise`: alert for the most severe event (closest on ties) and, for
/// slowdown types, a reduced speed.
pub fn advise(events: &[Nearby<TrafficEvent>], ctx: &ContextSnapshot) -> CandidateAdvisory {
    // `events` is sorted nearest first, so min_by_key keeps the closest.
    let Some(worst) = events.iter().min_by_key(|hit| hit.item.severity()) else {
        return CandidateAdvisory::from_capability(NAME).with_reason("No traffic events nearby");
    };
    let event = &worst.item;
    let response = severity_response(event.severity());
    let miles = worst.distance_mi();

    let mut text = format!("{} on {} - {miles:.1}mi ahead", event.type_label(), event.roadway_name);
    if event.roadway_name.is_empty() || text.chars().count() > ALERT_TEXT_MAX_CHARS {
        text = format!("{} ahead - {miles:.1}mi", event.type_label());
    }

    let mut candidate = CandidateAdvisory::from_capability(NAME)
        .with_alert(AlertCandidate {
            text: truncate_chars(&text, ALERT_TEXT_MAX_CHARS),
            severity: response.alert,
            confidence: response.confidence,
        })
        .with_reason(describe(worst));

    let base = ctx.vehicle.reference_speed_ms();
    if event.is_slowdown() && base > 0.0 {
        candidate = candidate.with_speed(SpeedCandidate {
            target_ms: base * (1.0 - response.reduction),
            source: format!("fl511_{}", event.event_type),
            confidence: response.confidence,
            distance_ahead_m: worst.distance_m as f32,
        });
    }
    candidate
}

pub struct TrafficAhead {
    fl511: Arc<Fl511Client>,
}

impl TrafficAhead {
    pub fn new(fl511: Arc<Fl511Client>) -> Self {
        Self { fl511 }
    }
}

#[async_trait]
impl Action for TrafficAhead {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Look up FL511 traffic events (accidents, road work, closures) near the \
         vehicle. 'check' lists them; 'advise' returns a speed and alert for the worst one."
    }

    fn input_schema(&self) -> Value {
        input_schema::<TrafficParams>()
    }

    async fn execute(
        &self,
        args: &Value,
        ctx: &ContextSnapshot,
    ) -> Result<CandidateAdvisory, RoadwiseError> {
        let p: TrafficParams = parse_args(NAME, args)?;
        if !self.fl511.source().is_configured() {
            return Ok(info_alert("FL511 API key not configured"));
        }
        let Some(origin) = ctx.location() else {
            return Ok(info_alert("No GPS location available"));
        };

        let fetched = self.fl511.fetch(&()).await;
        let stale = fetched.is_stale();
        let Some(all) = fetched.into_payload() else {
            return Ok(CandidateAdvisory::from_capability(NAME)
                .with_reason("FL511 unavailable, no cached events"));
        };
        let filter = NearbyFilter::within_miles(p.radius_miles)
            .corridor(p.roadway_filter.as_deref())
            .direction(p.direction_filter.as_deref());
        let hits = filter_nearby(all.as_slice(), &origin, &filter);
        debug!(total = all.len(), nearby = hits.len(), stale, "fl511 events filtered");

        if hits.is_empty() {
            return Ok(CandidateAdvisory::from_capability(NAME).with_reason(format!(
                "No traffic events within {:.0}mi",
                p.radius_miles
            )));
        }
        Ok(match p.action {
            TrafficMode::Check => check(&hits),
            TrafficMode::Advise => advise(&hits, ctx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::{driving, mph};
    use roadwise_sources::CachedClient;
    use roadwise_sources::fl511::{Fl511Source, default_policy};
    use serde_json::json;

    fn hit(kind: &str, severity: &str, road: &str, distance_m: f64) -> Nearby<TrafficEvent> {
        Nearby {
            item: TrafficEvent {
                id: "1".into(),
                roadway_name: road.into(),
                direction_of_travel: "Northbound".into(),
                event_type: kind.into(),
                severity: severity.into(),
                ..TrafficEvent::default()
            },
            distance_m,
        }
    }

    #[test]
    fn severity_table() {
        let crit = severity_response(EventSeverity::Critical);
        assert_eq!(crit.alert, AlertSeverity::Critical);
        assert_eq!(crit.reduction, 0.5);
        assert_eq!(severity_response(EventSeverity::Major).confidence, 0.8);
        assert_eq!(severity_response(EventSeverity::Moderate).reduction, 0.25);
        assert_eq!(severity_response(EventSeverity::Minor).alert, AlertSeverity::Info);
        assert_eq!(severity_response(EventSeverity::Unknown).confidence, 0.5);
    }

    #[test]
    fn advise_picks_most_severe_and_reduces_speed() {
        let events = [
            hit("roadwork", "Minor", "I-275", 1_000.0),
            hit("accidentsAndIncidents", "Major", "I-4", 3_218.688),
        ];
        let c = advise(&events, &driving(60.0));
        let alert = c.alert.unwrap();
        assert_eq!(alert.text, "Accident on I-4 - 2.0mi ahead");
        assert_eq!(alert.severity, AlertSeverity::Warning);
        let speed = c.speed.unwrap();
        assert!((speed.target_ms - mph(60.0) * 0.65).abs() < 1e-3);
        assert_eq!(speed.source, "fl511_accidentsAndIncidents");
        assert_eq!(speed.confidence, 0.8);
        assert!((speed.distance_ahead_m - 3_218.688).abs() < 1e-2);
    }

    #[test]
    fn advise_uses_cruise_when_higher() {
        let mut ctx = driving(40.0);
        ctx.vehicle.cruise_set_ms = mph(70.0);
        let c = advise(&[hit("closures", "Critical", "US-41", 500.0)], &ctx);
        assert!((c.speed.unwrap().target_ms - mph(35.0)).abs() < 1e-3);
    }

    #[test]
    fn advise_without_slowdown_type_is_alert_only() {
        let c = advise(&[hit("specialEvents", "Moderate", "Bayshore", 800.0)], &driving(30.0));
        assert!(c.speed.is_none());
        assert_eq!(c.alert.unwrap().severity, AlertSeverity::Warning);
    }

    #[test]
    fn advise_shortens_long_road_names() {
        let road = "Martin Luther King Jr Boulevard Service Road Eastbound";
        let c = advise(&[hit("roadwork", "Minor", road, 1_609.344)], &driving(30.0));
        assert_eq!(c.alert.unwrap().text, "Road work ahead - 1.0mi");
    }

    #[test]
    fn advise_at_standstill_emits_no_speed() {
        let mut ctx = driving(0.0);
        ctx.vehicle.standstill = true;
        let c = advise(&[hit("closures", "Critical", "I-4", 200.0)], &ctx);
        assert!(c.speed.is_none());
        assert!(c.alert.is_some());
    }

    #[test]
    fn check_counts_and_summarises_closest_five() {
        let events: Vec<_> = (0..7)
            .map(|i| hit("roadwork", "Minor", "I-75", 1_000.0 * (i as f64 + 1.0)))
            .collect();
        let c = check(&events);
        assert_eq!(c.alert.as_ref().unwrap().text, "7 traffic event(s) nearby");
        assert_eq!(c.reason.matches("Road work").count(), 5);
        assert!(c.speed.is_none());
    }

    #[tokio::test]
    async fn unconfigured_feed_reports_info_alert() {
        let client = Arc::new(CachedClient::new(Fl511Source::new(None), default_policy()));
        let c = TrafficAhead::new(client.clone())
            .execute(&json!({"action": "advise"}), &driving(50.0))
            .await
            .unwrap();
        assert_eq!(c.alert.unwrap().text, "FL511 API key not configured");
        assert_eq!(client.remote_calls(), 0);
    }

    #[tokio::test]
    async fn no_fix_reports_info_alert() {
        let client = Arc::new(CachedClient::new(
            Fl511Source::new(Some("key".into())),
            default_policy(),
        ));
        let c = TrafficAhead::new(client.clone())
            .execute(&json!({}), &ContextSnapshot::default())
            .await
            .unwrap();
        assert_eq!(c.alert.unwrap().text, "No GPS location available");
        assert_eq!(client.remote_calls(), 0);
    }

    #[tokio::test]
    async fn rejects_unknown_mode() {
        let client = Arc::new(CachedClient::new(Fl511Source::new(None), default_policy()));
        let err = TrafficAhead::new(client)
            .execute(&json!({"action": "panic"}), &driving(50.0))
            .await
            .unwrap_err();
        assert!(matches!(err, RoadwiseError::InvalidArguments { .. }));
    }
}
