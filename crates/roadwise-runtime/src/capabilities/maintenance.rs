//! `report_road_issue` – record a sighted road defect and react to it.
//!
//! Every report goes through the [`ObservationStore`], so a pothole seen on
//! five consecutive frames is stored once.  The advisory is produced either
//! way: a duplicate is still in front of the car.

use std::sync::Arc;

use async_trait::async_trait;
use roadwise_kernel::Action;
use roadwise_memory::ObservationStore;
use roadwise_types::{
    ALERT_TEXT_MAX_CHARS, AlertCandidate, AlertSeverity, CandidateAdvisory, ContextSnapshot,
    IssueCategory, IssueSeverity, LaneCandidate, LaneDirection, LanePosition, ObservationRecord,
    RoadwiseError, SpeedCandidate, truncate_chars,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::{input_schema, parse_args};

const NAME: &str = "report_road_issue";

/// Issues are in frame, so close.
const ISSUE_DISTANCE_M: f32 = 100.0;

/// Lane-change confidence relative to detection confidence.
const LANE_CONFIDENCE_FACTOR: f32 = 0.8;

/// Enum-valued fields arrive as free strings and are coerced, so a model
/// that invents a category still gets its report stored as `other`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RoadIssueParams {
    #[schemars(with = "IssueCategory")]
    pub issue_type: String,
    #[schemars(with = "IssueSeverity")]
    pub severity: String,
    #[serde(default)]
    #[schemars(with = "Option<LanePosition>")]
    pub lane_position: Option<String>,
    /// What is visible, e.g. "large pothole near lane marking".
    pub description: String,
    /// Detection confidence from 0.0 to 1.0.
    pub confidence: f32,
}

fn speed_reduction(severity: IssueSeverity) -> f32 {
    match severity {
        IssueSeverity::Severe => 0.30,
        IssueSeverity::Moderate => 0.15,
        IssueSeverity::Minor => 0.0,
    }
}

fn lane_away_from(position: LanePosition) -> Option<LaneDirection> {
    match position {
        LanePosition::CenterLane | LanePosition::RightLane => Some(LaneDirection::Left),
        LanePosition::LeftLane => Some(LaneDirection::Right),
        _ => None,
    }
}

/// Record stamped with the snapshot's position; no fix leaves `0, 0`.
pub fn build_record(params: &RoadIssueParams, ctx: &ContextSnapshot) -> ObservationRecord {
    let mut record = ObservationRecord::new(
        IssueCategory::parse(&params.issue_type),
        IssueSeverity::parse(&params.severity),
        &params.description,
        params.confidence,
    );
    if let Some(fix) = ctx.gps {
        record.latitude = fix.lat;
        record.longitude = fix.lon;
        record.accuracy_m = fix.accuracy_m;
        record.bearing_deg = fix.bearing_deg;
    }
    record.speed_ms = ctx.vehicle.speed_ms;
    record.road_name = ctx.map.road_name.clone().filter(|r| !r.is_empty());
    record.lane_position = params
        .lane_position
        .as_deref()
        .map(LanePosition::parse)
        .unwrap_or_default();
    record
}

/// Advisory for an issue, independent of whether it was a duplicate.
pub fn respond(record: &ObservationRecord, ctx: &ContextSnapshot) -> CandidateAdvisory {
    let label = record.category.label();
    let confidence = record.confidence;
    let (text, severity) = match record.severity {
        IssueSeverity::Severe => (format!("{label} ahead - caution"), AlertSeverity::Critical),
        IssueSeverity::Moderate => (format!("{label} reported"), AlertSeverity::Warning),
        IssueSeverity::Minor => (format!("{label} noted"), AlertSeverity::Info),
    };
    let mut candidate = CandidateAdvisory::from_capability(NAME).with_alert(AlertCandidate {
        text: truncate_chars(&text, ALERT_TEXT_MAX_CHARS),
        severity,
        confidence,
    });

    let reduction = speed_reduction(record.severity);
    let base = ctx.vehicle.reference_speed_ms();
    if reduction > 0.0 && record.lane_position.affects_travel_lane() && base > 0.0 {
        candidate = candidate.with_speed(SpeedCandidate {
            target_ms: base * (1.0 - reduction),
            source: format!("road_maintenance_{}", record.category.as_str()),
            confidence,
            distance_ahead_m: ISSUE_DISTANCE_M,
        });
    }

    if record.severity == IssueSeverity::Severe {
        if let Some(direction) = lane_away_from(record.lane_position) {
            let lane_name = format!("{:?}", record.lane_position);
            candidate = candidate.with_lane(LaneCandidate {
                direction,
                reason: format!("{label} in {}", humanize(&lane_name)),
                confidence: confidence * LANE_CONFIDENCE_FACTOR,
            });
        }
    }
    candidate
}

/// `CenterLane` → `center lane`.
fn humanize(camel: &str) -> String {
    let mut out = String::new();
    for (i, ch) in camel.chars().enumerate() {
        if ch.is_uppercase() && i > 0 {
            out.push(' ');
        }
        out.extend(ch.to_lowercase());
    }
    out
}

pub struct ReportRoadIssue {
    store: Arc<ObservationStore>,
}

impl ReportRoadIssue {
    pub fn new(store: Arc<ObservationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Action for ReportRoadIssue {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Report a road defect visible in the frame (pothole, crack, debris, faded \
         markings, damaged sign or guardrail, drainage or shoulder damage). The \
         report is stored for maintenance crews and yields caution advisories."
    }

    fn input_schema(&self) -> Value {
        input_schema::<RoadIssueParams>()
    }

    async fn execute(
        &self,
        args: &Value,
        ctx: &ContextSnapshot,
    ) -> Result<CandidateAdvisory, RoadwiseError> {
        let params: RoadIssueParams = parse_args(NAME, args)?;
        let record = build_record(&params, ctx);
        let outcome = self.store.record(&record);

        let mut reason = vec![format!(
            "{}: {} ({:?})",
            if outcome.is_duplicate() {
                "Duplicate skipped"
            } else {
                "Recorded"
            },
            record.category.label(),
            record.severity
        )];
        match record.location() {
            Some(p) => reason.push(format!("Location: {:.6}, {:.6}", p.lat, p.lon)),
            None => reason.push("Location: no GPS fix".to_string()),
        }
        if let Some(road) = &record.road_name {
            reason.push(format!("Road: {road}"));
        }
        reason.push(format!("Lane: {:?}", record.lane_position));
        if !outcome.is_duplicate() {
            reason.push(format!("Report ID: {}", record.id));
        }

        Ok(respond(&record, ctx).with_reason(reason.join(" | ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::{driving, mph};
    use roadwise_memory::{DedupEngine, ObservationLog};
    use serde_json::json;

    fn store() -> Arc<ObservationStore> {
        let log = ObservationLog::open_in_memory().unwrap();
        Arc::new(ObservationStore::new(DedupEngine::default(), Some(log)))
    }

    #[tokio::test]
    async fn severe_pothole_in_right_lane() {
        let action = ReportRoadIssue::new(store());
        let c = action
            .execute(
                &json!({
                    "issue_type": "pothole",
                    "severity": "severe",
                    "lane_position": "right_lane",
                    "description": "deep pothole",
                    "confidence": 0.9
                }),
                &driving(50.0),
            )
            .await
            .unwrap();

        let alert = c.alert.unwrap();
        assert_eq!(alert.text, "Pothole ahead - caution");
        assert_eq!(alert.severity, AlertSeverity::Critical);

        let speed = c.speed.unwrap();
        assert!((speed.target_ms - mph(35.0)).abs() < 1e-3);
        assert_eq!(speed.source, "road_maintenance_pothole");
        assert_eq!(speed.distance_ahead_m, 100.0);

        let lane = c.lane.unwrap();
        assert_eq!(lane.direction, LaneDirection::Left);
        assert!((lane.confidence - 0.72).abs() < 1e-6);
        assert_eq!(lane.reason, "Pothole in right lane");
        assert!(c.reason.starts_with("Recorded"));
    }

    #[tokio::test]
    async fn moderate_on_shoulder_is_alert_only() {
        let c = ReportRoadIssue::new(store())
            .execute(
                &json!({"issue_type": "debris", "severity": "moderate",
                        "lane_position": "shoulder", "description": "tire", "confidence": 0.6}),
                &driving(50.0),
            )
            .await
            .unwrap();
        assert_eq!(c.alert.unwrap().text, "Debris reported");
        assert!(c.speed.is_none());
        assert!(c.lane.is_none());
    }

    #[tokio::test]
    async fn invalid_enums_are_coerced() {
        let store = store();
        let c = ReportRoadIssue::new(store.clone())
            .execute(
                &json!({"issue_type": "sinkhole", "severity": "apocalyptic",
                        "lane_position": "sky", "description": "?", "confidence": 0.5}),
                &driving(40.0),
            )
            .await
            .unwrap();
        assert_eq!(c.alert.unwrap().text, "Road issue noted");
        let stored = store.dedup().recent();
        assert_eq!(stored[0].category, IssueCategory::Other);
        assert_eq!(stored[0].severity, IssueSeverity::Minor);
        assert_eq!(stored[0].lane_position, LanePosition::Unknown);
    }

    #[tokio::test]
    async fn repeat_sighting_is_skipped_but_still_advised() {
        let store = store();
        let action = ReportRoadIssue::new(store.clone());
        let args = json!({"issue_type": "crack", "severity": "moderate",
                          "description": "long crack", "confidence": 0.8});
        let first = action.execute(&args, &driving(45.0)).await.unwrap();
        let second = action.execute(&args, &driving(45.0)).await.unwrap();
        assert!(first.reason.starts_with("Recorded"));
        assert!(second.reason.starts_with("Duplicate skipped"));
        assert!(second.speed.is_some());
        assert_eq!(store.persisted_count(), Some(1));
    }

    #[tokio::test]
    async fn no_fix_reports_are_never_deduplicated() {
        let store = store();
        let action = ReportRoadIssue::new(store.clone());
        let args = json!({"issue_type": "pothole", "severity": "minor",
                          "description": "small", "confidence": 0.5});
        let ctx = ContextSnapshot::default();
        for _ in 0..3 {
            let c = action.execute(&args, &ctx).await.unwrap();
            assert!(c.reason.contains("no GPS fix"));
        }
        assert_eq!(store.persisted_count(), Some(3));
    }

    #[test]
    fn humanizes_lane_names() {
        assert_eq!(humanize("CenterLane"), "center lane");
        assert_eq!(humanize("Median"), "median");
    }
}
