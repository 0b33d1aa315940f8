//! `roadwise-types` – shared vocabulary of the advisory pipeline.
//!
//! Everything that crosses a crate boundary lives here: the advisory model
//! produced by capabilities and consumed by the planner, the per-cycle
//! [`ContextSnapshot`], persisted [`ObservationRecord`]s, geodesic helpers
//! and the workspace-wide [`RoadwiseError`].

pub mod advisory;
pub mod context;
pub mod geo;
pub mod observation;

use std::sync::OnceLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use advisory::{
    Advisory, AlertAxis, AlertCandidate, AlertSeverity, CandidateAdvisory, LaneAxis,
    LaneCandidate, LaneDirection, SpeedAxis, SpeedCandidate,
};
pub use context::{
    ContextSnapshot, Frame, GpsFix, LeadVehicle, MapAttributes, NetworkStatus, SystemState,
    VehicleState,
};
pub use geo::GeoPoint;
pub use observation::{IssueCategory, IssueSeverity, LanePosition, ObservationRecord};

/// Maximum length of an alert shown on the driver display.
pub const ALERT_TEXT_MAX_CHARS: usize = 50;

/// Conversion factor from miles per hour to metres per second.
pub const MPH_TO_MS: f32 = 0.44704;

/// Whether a registered capability is invoked by the reasoning engine or only
/// contributes instructions to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// Executable with JSON arguments; yields a [`CandidateAdvisory`].
    Action,
    /// Prompt fragment injected into the engine's instructions.
    Knowledge,
}

/// Global error type spanning source outages, reasoning failures, capability
/// faults and registry misuse.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoadwiseError {
    #[error("Capability '{0}' is already registered")]
    DuplicateName(String),

    #[error("Capability '{0}' is not registered")]
    NotFound(String),

    #[error("Source '{source_name}' unavailable: {details}")]
    SourceUnavailable {
        source_name: String,
        details: String,
    },

    #[error("Reasoning engine did not answer within {0} ms")]
    ReasoningTimeout(u64),

    #[error("Reasoning engine error: {0}")]
    ReasoningFailed(String),

    #[error("Invalid arguments for '{name}': {details}")]
    InvalidArguments { name: String, details: String },

    #[error("Capability '{name}' failed: {details}")]
    CapabilityExecution { name: String, details: String },

    #[error("Context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Truncate `text` to at most `max_chars` characters without splitting a
/// UTF-8 code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Seconds elapsed on a process-local monotonic clock.
///
/// Used for age comparisons that must not jump with wall-clock changes.
pub fn monotonic_seconds() -> f64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now).elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_chars("Pothole ahead", 50), "Pothole ahead");
    }

    #[test]
    fn truncate_cuts_on_char_boundary() {
        let text = "ñandú crossing ahead";
        assert_eq!(truncate_chars(text, 5), "ñandú");
    }

    #[test]
    fn truncate_to_zero_is_empty() {
        assert_eq!(truncate_chars("anything", 0), "");
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let a = monotonic_seconds();
        let b = monotonic_seconds();
        assert!(b >= a);
    }

    #[test]
    fn capability_kind_serializes_lowercase() {
        let json = serde_json::to_string(&CapabilityKind::Knowledge).unwrap();
        assert_eq!(json, "\"knowledge\"");
    }

    #[test]
    fn roadwise_error_display() {
        let err = RoadwiseError::DuplicateName("set_alert".to_string());
        assert!(err.to_string().contains("already registered"));

        let err2 = RoadwiseError::SourceUnavailable {
            source_name: "fl511".to_string(),
            details: "timeout".to_string(),
        };
        assert!(err2.to_string().contains("fl511"));
        assert!(err2.to_string().contains("timeout"));
    }
}
