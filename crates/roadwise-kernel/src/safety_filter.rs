//! [`SafetyFilter`] – the last-mile gate between the merge engine and the
//! planner.
//!
//! Every advisory that leaves the pipeline passes through
//! [`SafetyFilter::apply`].  The only way to obtain a [`FilteredAdvisory`] is
//! through this filter, and the advisory channel accepts nothing else, so
//! there is no path to the planner that skips the bounds below:
//!
//! 1. **Speed clamp** – the target is clamped to `[0, max_speed_ms]`.
//! 2. **Step limit** – a target more than `max_step_ms` below the reference
//!    speed becomes `reference - max_step_ms`.  Successive cycles therefore
//!    ramp down instead of jumping.
//! 3. **Confidence gate** – confidences are clamped to `[0, 1]`; any axis
//!    below `min_confidence` is reset to its inactive default.
//! 4. **Text bound** – alert text is cut to the display limit.
//!
//! The filter is pure and idempotent for a fixed reference speed:
//! `apply(apply(x)) == apply(x)`.
//!
//! # Example
//!
//! ```
//! use roadwise_kernel::safety_filter::SafetyFilter;
//! use roadwise_types::{Advisory, SpeedAxis};
//!
//! let filter = SafetyFilter::default();
//! let merged = Advisory {
//!     speed: SpeedAxis { active: true, target_ms: 5.0, confidence: 0.9, ..SpeedAxis::default() },
//!     ..Advisory::default()
//! };
//!
//! // Previously published 31 m/s: the drop is limited to 20 m/s this cycle.
//! let filtered = filter.apply(&merged, Some(31.0));
//! assert_eq!(filtered.speed.target_ms, 11.0);
//! ```

use std::ops::Deref;

use roadwise_types::{
    ALERT_TEXT_MAX_CHARS, Advisory, AlertAxis, LaneAxis, SpeedAxis, truncate_chars,
};
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Limits
// ────────────────────────────────────────────────────────────────────────────

/// Hard numeric bounds enforced on every published advisory.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyLimits {
    /// Upper speed bound in m/s (~100 mph).
    pub max_speed_ms: f32,
    /// Largest allowed drop below the reference speed per cycle, in m/s.
    pub max_step_ms: f32,
    /// Axes below this confidence are deactivated.
    pub min_confidence: f32,
    pub alert_text_max: usize,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_speed_ms: 45.0,
            max_step_ms: 20.0,
            min_confidence: 0.3,
            alert_text_max: ALERT_TEXT_MAX_CHARS,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FilteredAdvisory
// ────────────────────────────────────────────────────────────────────────────

/// An [`Advisory`] that has passed the [`SafetyFilter`].
///
/// Cannot be constructed outside this module.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredAdvisory(Advisory);

impl FilteredAdvisory {
    pub fn into_inner(self) -> Advisory {
        self.0
    }
}

impl Deref for FilteredAdvisory {
    type Target = Advisory;

    fn deref(&self) -> &Advisory {
        &self.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyFilter
// ────────────────────────────────────────────────────────────────────────────

/// Stateless clamp/gate applied to every merged advisory.
#[derive(Debug, Clone, Default)]
pub struct SafetyFilter {
    limits: SafetyLimits,
}

impl SafetyFilter {
    pub fn new(limits: SafetyLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// An all-inactive advisory, for clearing the channel.
    pub fn empty(&self) -> FilteredAdvisory {
        FilteredAdvisory(Advisory::default())
    }

    /// Filter `merged`.
    ///
    /// `reference_speed_ms` is the speed the step limit is measured against:
    /// the previously published target, or the vehicle's current speed when
    /// nothing has been published.  `None` disables the step limit.
    pub fn apply(&self, merged: &Advisory, reference_speed_ms: Option<f32>) -> FilteredAdvisory {
        let mut out = merged.clone();
        out.speed = self.filter_speed(&merged.speed, reference_speed_ms);
        out.lane = self.filter_lane(&merged.lane);
        out.alert = self.filter_alert(&merged.alert);
        FilteredAdvisory(out)
    }

    fn gate(&self, active: bool, confidence: f32, axis: &str) -> Option<f32> {
        if !active {
            return None;
        }
        let clamped = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if clamped < self.limits.min_confidence {
            debug!(axis, confidence, "axis below confidence floor, deactivated");
            None
        } else {
            Some(clamped)
        }
    }

    fn filter_speed(&self, speed: &SpeedAxis, reference_speed_ms: Option<f32>) -> SpeedAxis {
        let Some(confidence) = self.gate(speed.active, speed.confidence, "speed") else {
            return SpeedAxis::default();
        };
        if !speed.target_ms.is_finite() {
            warn!("non-finite speed target dropped");
            return SpeedAxis::default();
        }

        let mut target = speed.target_ms.clamp(0.0, self.limits.max_speed_ms);
        if let Some(reference) = reference_speed_ms.filter(|r| r.is_finite()) {
            let floor = reference - self.limits.max_step_ms;
            if target < floor {
                warn!(
                    requested = target,
                    reference,
                    limited = floor,
                    "speed reduction exceeds step limit, clamped"
                );
                target = floor.min(self.limits.max_speed_ms).max(0.0);
            }
        }

        SpeedAxis {
            active: true,
            target_ms: target,
            source: speed.source.clone(),
            confidence,
            distance_ahead_m: speed.distance_ahead_m.max(0.0),
        }
    }

    fn filter_lane(&self, lane: &LaneAxis) -> LaneAxis {
        match self.gate(lane.active, lane.confidence, "lane") {
            Some(confidence) => LaneAxis {
                confidence,
                ..lane.clone()
            },
            None => LaneAxis::default(),
        }
    }

    fn filter_alert(&self, alert: &AlertAxis) -> AlertAxis {
        match self.gate(alert.active, alert.confidence, "alert") {
            Some(confidence) => AlertAxis {
                active: true,
                text: truncate_chars(&alert.text, self.limits.alert_text_max),
                severity: alert.severity,
                confidence,
            },
            None => AlertAxis::default(),
        }
    }
}
