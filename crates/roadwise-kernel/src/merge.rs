//! Merge engine: folds a cycle's candidates into exactly one [`Advisory`].
//!
//! Precedence per axis:
//!
//! | Axis  | Winner                                   | Tie-break                          |
//! |-------|------------------------------------------|------------------------------------|
//! | speed | lowest target                            | higher confidence, then lower rank |
//! | lane  | highest confidence                       | conflicting directions → `none`    |
//! | alert | highest severity                         | higher confidence, then lower rank |
//!
//! Lane and alert candidates below the policy's confidence floor never win
//! their axis.  Speed takes the lowest finite target whatever its confidence;
//! the [`SafetyFilter`](crate::SafetyFilter) deactivates a weak winner rather
//! than letting a faster suggestion through.  The merge is pure: the same candidates always produce the same advisory,
//! regardless of the order they arrive in.

use std::cmp::Ordering;

use roadwise_types::{
    ALERT_TEXT_MAX_CHARS, Advisory, AlertAxis, AlertCandidate, CandidateAdvisory, LaneAxis,
    LaneCandidate, LaneDirection, SpeedAxis, SpeedCandidate, truncate_chars,
};

/// Reason attached to a lane axis neutralised by a tie.
pub const CONFLICTING_LANE_REASON: &str = "conflicting lane suggestions";

/// Tunables for [`merge_with`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergePolicy {
    /// Lane and alert candidates whose confidence is below this bound are
    /// ignored.
    pub min_confidence: f32,
    pub alert_text_max: usize,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            alert_text_max: ALERT_TEXT_MAX_CHARS,
        }
    }
}

/// Merge with the default policy.
///
/// ```
/// use roadwise_kernel::merge::merge;
/// use roadwise_types::{CandidateAdvisory, SpeedCandidate, MPH_TO_MS};
///
/// let speed = |mph: f32, confidence: f32| SpeedCandidate {
///     target_ms: mph * MPH_TO_MS,
///     source: "test".into(),
///     confidence,
///     distance_ahead_m: 200.0,
/// };
/// let merged = merge(&[
///     CandidateAdvisory::from_capability("a").with_speed(speed(45.0, 0.6)),
///     CandidateAdvisory::from_capability("b").with_speed(speed(35.0, 0.9)),
/// ]);
/// assert!((merged.speed.target_ms - 35.0 * MPH_TO_MS).abs() < 1e-4);
/// ```
pub fn merge(candidates: &[CandidateAdvisory]) -> Advisory {
    merge_with(&MergePolicy::default(), candidates)
}

/// Merge `candidates` under `policy`.  An empty input yields an advisory with
/// every axis inactive.
pub fn merge_with(policy: &MergePolicy, candidates: &[CandidateAdvisory]) -> Advisory {
    let mut ordered: Vec<&CandidateAdvisory> = candidates.iter().collect();
    ordered.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.capability.cmp(&b.capability)));

    let eligible = |confidence: f32| confidence.is_finite() && confidence >= policy.min_confidence;

    let speed = ordered
        .iter()
        .filter_map(|c| c.speed.as_ref().map(|s| (c.rank, s)))
        .filter(|(_, s)| s.target_ms.is_finite())
        .min_by(|a, b| speed_precedence(*a, *b))
        .map(|(_, s)| SpeedAxis::from(s.clone()))
        .unwrap_or_default();

    let lane = merge_lane(
        ordered
            .iter()
            .filter_map(|c| c.lane.as_ref().map(|l| (c.rank, l)))
            .filter(|(_, l)| eligible(l.confidence))
            .collect(),
    );

    let alert = ordered
        .iter()
        .filter_map(|c| c.alert.as_ref().map(|a| (c.rank, a)))
        .filter(|(_, a)| eligible(a.confidence))
        .min_by(|a, b| alert_precedence(*a, *b))
        .map(|(_, a)| {
            let mut axis = AlertAxis::from(a.clone());
            axis.text = truncate_chars(&axis.text, policy.alert_text_max);
            axis
        })
        .unwrap_or_default();

    let mut capabilities: Vec<String> = Vec::new();
    let mut reasons: Vec<&str> = Vec::new();
    for c in ordered.iter().filter(|c| !c.is_empty()) {
        if !capabilities.contains(&c.capability) {
            capabilities.push(c.capability.clone());
        }
        let reason = c.reason.trim();
        if !reason.is_empty() && !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }

    Advisory {
        speed,
        lane,
        alert,
        capabilities,
        reason: reasons.join("; "),
    }
}

/// `Less` means `a` wins.
fn speed_precedence(a: (usize, &SpeedCandidate), b: (usize, &SpeedCandidate)) -> Ordering {
    a.1.target_ms
        .total_cmp(&b.1.target_ms)
        .then_with(|| b.1.confidence.total_cmp(&a.1.confidence))
        .then_with(|| a.0.cmp(&b.0))
        .then_with(|| a.1.source.cmp(&b.1.source))
}

/// `Less` means `a` wins.
fn alert_precedence(a: (usize, &AlertCandidate), b: (usize, &AlertCandidate)) -> Ordering {
    b.1.severity
        .cmp(&a.1.severity)
        .then_with(|| b.1.confidence.total_cmp(&a.1.confidence))
        .then_with(|| a.0.cmp(&b.0))
        .then_with(|| a.1.text.cmp(&b.1.text))
}

fn merge_lane(eligible: Vec<(usize, &LaneCandidate)>) -> LaneAxis {
    let Some(top) = eligible
        .iter()
        .map(|(_, l)| l.confidence)
        .max_by(|a, b| a.total_cmp(b))
    else {
        return LaneAxis::default();
    };

    let tied: Vec<&(usize, &LaneCandidate)> =
        eligible.iter().filter(|(_, l)| l.confidence == top).collect();

    let first_direction = tied[0].1.direction;
    if tied.iter().any(|(_, l)| l.direction != first_direction) {
        return LaneAxis {
            active: true,
            direction: LaneDirection::None,
            reason: CONFLICTING_LANE_REASON.to_string(),
            confidence: top,
        };
    }

    tied.iter()
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, l)| LaneAxis::from((*l).clone()))
        .unwrap_or_default()
}
