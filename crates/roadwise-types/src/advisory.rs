//! Advisory model: what capabilities propose and what the planner reads.
//!
//! A [`CandidateAdvisory`] is produced by one capability execution and lives
//! for one cycle.  Candidates are merged into a single [`Advisory`] holding at
//! most one recommendation per axis.  An inactive axis always carries its
//! default values so nothing from a previous cycle leaks through.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Enumerations
// ────────────────────────────────────────────────────────────────────────────

/// Suggested lateral move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LaneDirection {
    #[default]
    None,
    Left,
    Right,
}

impl LaneDirection {
    /// Parse a free-form direction; anything unrecognised maps to `None`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => Self::Left,
            "right" => Self::Right,
            _ => Self::None,
        }
    }
}

/// Alert tiers, ordered `Info < Warning < Critical`.
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
pub enum AlertSeverity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    /// Parse a severity string; unknown tiers fall back to `Info`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "warning" => Self::Warning,
            "critical" => Self::Critical,
            _ => Self::Info,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Candidates
// ────────────────────────────────────────────────────────────────────────────

/// A proposed speed target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedCandidate {
    /// Target in metres per second.
    pub target_ms: f32,
    /// Short tag naming what motivated the target (e.g. `"fl511"`).
    pub source: String,
    pub confidence: f32,
    pub distance_ahead_m: f32,
}

/// A proposed lane change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneCandidate {
    pub direction: LaneDirection,
    pub reason: String,
    pub confidence: f32,
}

/// A proposed driver alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub text: String,
    pub severity: AlertSeverity,
    pub confidence: f32,
}

/// Output of a single capability execution.  Every axis is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateAdvisory {
    /// Name of the capability that produced this candidate.
    pub capability: String,
    /// Registration rank of that capability; lower ranks win ties.
    pub rank: usize,
    pub speed: Option<SpeedCandidate>,
    pub lane: Option<LaneCandidate>,
    pub alert: Option<AlertCandidate>,
    pub reason: String,
}

impl CandidateAdvisory {
    /// Start an empty candidate attributed to `capability`.
    pub fn from_capability(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            ..Self::default()
        }
    }

    pub fn with_speed(mut self, speed: SpeedCandidate) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_lane(mut self, lane: LaneCandidate) -> Self {
        self.lane = Some(lane);
        self
    }

    pub fn with_alert(mut self, alert: AlertCandidate) -> Self {
        self.alert = Some(alert);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// `true` when no axis carries a proposal.
    pub fn is_empty(&self) -> bool {
        self.speed.is_none() && self.lane.is_none() && self.alert.is_none()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Merged advisory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedAxis {
    pub active: bool,
    pub target_ms: f32,
    pub source: String,
    pub confidence: f32,
    pub distance_ahead_m: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneAxis {
    pub active: bool,
    pub direction: LaneDirection,
    pub reason: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertAxis {
    pub active: bool,
    pub text: String,
    pub severity: AlertSeverity,
    pub confidence: f32,
}

/// One recommendation per axis, as handed to the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub speed: SpeedAxis,
    pub lane: LaneAxis,
    pub alert: AlertAxis,
    /// Capabilities that contributed a candidate, in registration order.
    pub capabilities: Vec<String>,
    /// Reasons of the contributing candidates joined with `"; "`.
    pub reason: String,
}

impl Advisory {
    /// `true` when at least one axis is active.
    pub fn any_active(&self) -> bool {
        self.speed.active || self.lane.active || self.alert.active
    }

    /// Confidence of the strongest active axis, `0.0` when all are inactive.
    pub fn peak_confidence(&self) -> f32 {
        [
            (self.speed.active, self.speed.confidence),
            (self.lane.active, self.lane.confidence),
            (self.alert.active, self.alert.confidence),
        ]
        .into_iter()
        .filter(|(active, _)| *active)
        .map(|(_, c)| c)
        .fold(0.0, f32::max)
    }
}

impl From<SpeedCandidate> for SpeedAxis {
    fn from(c: SpeedCandidate) -> Self {
        Self {
            active: true,
            target_ms: c.target_ms,
            source: c.source,
            confidence: c.confidence,
            distance_ahead_m: c.distance_ahead_m,
        }
    }
}

impl From<LaneCandidate> for LaneAxis {
    fn from(c: LaneCandidate) -> Self {
        Self {
            active: true,
            direction: c.direction,
            reason: c.reason,
            confidence: c.confidence,
        }
    }
}

impl From<AlertCandidate> for AlertAxis {
    fn from(c: AlertCandidate) -> Self {
        Self {
            active: true,
            text: c.text,
            severity: c.severity,
            confidence: c.confidence,
        }
    }
}
