//! The three direct advisory actions: the engine states a speed, a lane
//! change or an alert outright.

use async_trait::async_trait;
use roadwise_kernel::Action;
use roadwise_types::{
    ALERT_TEXT_MAX_CHARS, AlertCandidate, AlertSeverity, CandidateAdvisory, ContextSnapshot,
    LaneCandidate, LaneDirection, MPH_TO_MS, RoadwiseError, SpeedCandidate, truncate_chars,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::{input_schema, parse_args};

// ─────────────────────────────────────────────────────────────────────────────
// set_speed_advisory
// ─────────────────────────────────────────────────────────────────────────────

fn default_distance_ahead() -> f32 {
    200.0
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpeedAdvisoryParams {
    /// Recommended target speed in mph (e.g. 45 for a construction zone).
    pub speed_mph: f32,
    /// Short explanation, e.g. `construction_zone`, `school_zone`.
    pub reason: String,
    /// Confidence from 0.0 to 1.0.
    pub confidence: f32,
    /// Distance in metres to the condition; 200 when unknown.
    #[serde(default = "default_distance_ahead")]
    pub distance_ahead_m: f32,
}

pub struct SetSpeedAdvisory;

#[async_trait]
impl Action for SetSpeedAdvisory {
    fn name(&self) -> &str {
        "set_speed_advisory"
    }

    fn description(&self) -> &str {
        "Suggest a target speed when conditions ahead call for it: construction \
         zones, sharp curves, bad weather, school zones, heavy traffic or other hazards."
    }

    fn input_schema(&self) -> Value {
        input_schema::<SpeedAdvisoryParams>()
    }

    async fn execute(
        &self,
        args: &Value,
        _ctx: &ContextSnapshot,
    ) -> Result<CandidateAdvisory, RoadwiseError> {
        let p: SpeedAdvisoryParams = parse_args(self.name(), args)?;
        Ok(CandidateAdvisory::from_capability(self.name())
            .with_speed(SpeedCandidate {
                target_ms: p.speed_mph * MPH_TO_MS,
                source: p.reason.clone(),
                confidence: p.confidence,
                distance_ahead_m: p.distance_ahead_m,
            })
            .with_reason(p.reason))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// set_lane_advisory
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LaneChoice {
    Left,
    Right,
}

impl From<LaneChoice> for LaneDirection {
    fn from(c: LaneChoice) -> Self {
        match c {
            LaneChoice::Left => LaneDirection::Left,
            LaneChoice::Right => LaneDirection::Right,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LaneAdvisoryParams {
    /// Suggested lane change direction.
    pub direction: LaneChoice,
    /// Short explanation, e.g. `slow_truck_ahead`, `merge_required`.
    pub reason: String,
    /// Confidence from 0.0 to 1.0.
    pub confidence: f32,
}

pub struct SetLaneAdvisory;

#[async_trait]
impl Action for SetLaneAdvisory {
    fn name(&self) -> &str {
        "set_lane_advisory"
    }

    fn description(&self) -> &str {
        "Suggest a lane change, e.g. for a slow truck, a required merge or an \
         obstruction. Advisory only; the driver confirms."
    }

    fn input_schema(&self) -> Value {
        input_schema::<LaneAdvisoryParams>()
    }

    async fn execute(
        &self,
        args: &Value,
        _ctx: &ContextSnapshot,
    ) -> Result<CandidateAdvisory, RoadwiseError> {
        let p: LaneAdvisoryParams = parse_args(self.name(), args)?;
        Ok(CandidateAdvisory::from_capability(self.name())
            .with_lane(LaneCandidate {
                direction: p.direction.into(),
                reason: p.reason.clone(),
                confidence: p.confidence,
            })
            .with_reason(p.reason))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// set_alert
// ─────────────────────────────────────────────────────────────────────────────

fn full_confidence() -> f32 {
    1.0
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AlertParams {
    /// Short text for the driver display (max 50 characters).
    pub text: String,
    pub severity: AlertSeverity,
    /// Confidence from 0.0 to 1.0; defaults to 1.0.
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

pub struct SetAlert;

#[async_trait]
impl Action for SetAlert {
    fn name(&self) -> &str {
        "set_alert"
    }

    fn description(&self) -> &str {
        "Show a short alert on the driver display: construction ahead, an \
         emergency vehicle, unusual road conditions or another hazard."
    }

    fn input_schema(&self) -> Value {
        input_schema::<AlertParams>()
    }

    async fn execute(
        &self,
        args: &Value,
        _ctx: &ContextSnapshot,
    ) -> Result<CandidateAdvisory, RoadwiseError> {
        let p: AlertParams = parse_args(self.name(), args)?;
        let text = truncate_chars(p.text.trim(), ALERT_TEXT_MAX_CHARS);
        Ok(CandidateAdvisory::from_capability(self.name())
            .with_alert(AlertCandidate {
                text: text.clone(),
                severity: p.severity,
                confidence: p.confidence,
            })
            .with_reason(text))
    }
}
