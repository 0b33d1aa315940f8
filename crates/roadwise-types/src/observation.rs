//! [`ObservationRecord`] – an on-board road-condition sighting.
//!
//! Records are immutable once created.  They are kept in a bounded recent
//! history for duplicate suppression and appended to a durable log.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::monotonic_seconds;

/// Maximum stored description length.
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// Closed set of reportable road issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Pothole,
    Crack,
    SurfaceDamage,
    Debris,
    FadedMarkings,
    DamagedSign,
    BrokenGuardrail,
    DrainageIssue,
    ShoulderDamage,
    #[default]
    Other,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 10] = [
        Self::Pothole,
        Self::Crack,
        Self::SurfaceDamage,
        Self::Debris,
        Self::FadedMarkings,
        Self::DamagedSign,
        Self::BrokenGuardrail,
        Self::DrainageIssue,
        Self::ShoulderDamage,
        Self::Other,
    ];

    /// Parse a snake_case name; unknown names map to `Other`.
    pub fn parse(raw: &str) -> Self {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pothole => "pothole",
            Self::Crack => "crack",
            Self::SurfaceDamage => "surface_damage",
            Self::Debris => "debris",
            Self::FadedMarkings => "faded_markings",
            Self::DamagedSign => "damaged_sign",
            Self::BrokenGuardrail => "broken_guardrail",
            Self::DrainageIssue => "drainage_issue",
            Self::ShoulderDamage => "shoulder_damage",
            Self::Other => "other",
        }
    }

    /// Display label used in driver alerts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pothole => "Pothole",
            Self::Crack => "Road crack",
            Self::SurfaceDamage => "Surface damage",
            Self::Debris => "Debris",
            Self::FadedMarkings => "Faded markings",
            Self::DamagedSign => "Damaged sign",
            Self::BrokenGuardrail => "Broken guardrail",
            Self::DrainageIssue => "Drainage issue",
            Self::ShoulderDamage => "Shoulder damage",
            Self::Other => "Road issue",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    #[default]
    Minor,
    Moderate,
    Severe,
}

impl IssueSeverity {
    /// Parse a severity name; unknown names map to `Minor`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "moderate" => Self::Moderate,
            "severe" => Self::Severe,
            _ => Self::Minor,
        }
    }
}

/// Where on the carriageway an issue was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LanePosition {
    LeftLane,
    CenterLane,
    RightLane,
    Shoulder,
    Median,
    #[default]
    Unknown,
}

impl LanePosition {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left_lane" => Self::LeftLane,
            "center_lane" => Self::CenterLane,
            "right_lane" => Self::RightLane,
            "shoulder" => Self::Shoulder,
            "median" => Self::Median,
            _ => Self::Unknown,
        }
    }

    /// `true` for positions inside a lane the vehicle may be driving in.
    pub fn affects_travel_lane(&self) -> bool {
        matches!(
            self,
            Self::LeftLane | Self::CenterLane | Self::RightLane | Self::Unknown
        )
    }
}

/// A single persisted sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Process-local monotonic seconds; used for age comparisons.
    pub monotonic_s: f64,
    /// `0.0, 0.0` means "no fix".
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f32,
    pub bearing_deg: f32,
    pub speed_ms: f32,
    pub road_name: Option<String>,
    pub category: IssueCategory,
    pub severity: IssueSeverity,
    pub lane_position: LanePosition,
    pub description: String,
    pub confidence: f32,
}

impl ObservationRecord {
    /// Create a record stamped with the current wall and monotonic clocks.
    /// The description is truncated to [`DESCRIPTION_MAX_CHARS`] and the
    /// confidence clamped to `[0, 1]`.
    pub fn new(
        category: IssueCategory,
        severity: IssueSeverity,
        description: &str,
        confidence: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            monotonic_s: monotonic_seconds(),
            latitude: 0.0,
            longitude: 0.0,
            accuracy_m: 0.0,
            bearing_deg: 0.0,
            speed_ms: 0.0,
            road_name: None,
            category,
            severity,
            lane_position: LanePosition::Unknown,
            description: crate::truncate_chars(description, DESCRIPTION_MAX_CHARS),
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    /// Location of the sighting, `None` for a no-fix record.
    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_raw(self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_accepts_every_known_name() {
        for c in IssueCategory::ALL {
            assert_eq!(IssueCategory::parse(c.as_str()), c);
        }
    }

    #[test]
    fn unknown_category_maps_to_other() {
        assert_eq!(IssueCategory::parse("sinkhole"), IssueCategory::Other);
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&IssueCategory::BrokenGuardrail).unwrap();
        assert_eq!(json, "\"broken_guardrail\"");
    }

    #[test]
    fn new_record_truncates_description_and_clamps_confidence() {
        let long = "x".repeat(800);
        let rec = ObservationRecord::new(IssueCategory::Debris, IssueSeverity::Severe, &long, 1.7);
        assert_eq!(rec.description.chars().count(), DESCRIPTION_MAX_CHARS);
        assert_eq!(rec.confidence, 1.0);
        assert!(rec.location().is_none());
    }

    #[test]
    fn shoulder_is_not_a_travel_lane() {
        assert!(!LanePosition::Shoulder.affects_travel_lane());
        assert!(LanePosition::RightLane.affects_travel_lane());
        assert!(LanePosition::Unknown.affects_travel_lane());
    }

    #[test]
    fn record_roundtrip_preserves_id() {
        let rec = ObservationRecord::new(IssueCategory::Pothole, IssueSeverity::Minor, "small", 0.6);
        let json = serde_json::to_string(&rec).unwrap();
        let back: ObservationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, rec.id);
        assert_eq!(back.category, IssueCategory::Pothole);
    }
}
