//! Spatio-temporal duplicate suppression for road observations.
//!
//! A new sighting repeats a recent one when the recent history holds a record
//! of the same category within [`DedupThresholds::radius_m`] metres and
//! [`DedupThresholds::window_s`] seconds of monotonic time.  Both bounds are
//! inclusive.  Records without a GPS fix can neither be matched nor match
//! anything: they are always novel.
//!
//! [`DedupEngine`] owns the bounded recent-history ring.  Nothing else
//! mutates it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use roadwise_types::{GeoPoint, ObservationRecord};
use tracing::debug;

/// Default ring capacity.
pub const DEFAULT_RING_CAPACITY: usize = 100;

/// Distance and age bounds for duplicate detection.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupThresholds {
    pub radius_m: f64,
    pub window_s: f64,
}

impl Default for DedupThresholds {
    fn default() -> Self {
        Self {
            radius_m: 50.0,
            window_s: 300.0,
        }
    }
}

/// `true` when `history` already holds a sighting that `candidate` repeats.
///
/// ```
/// use roadwise_memory::dedup::{is_duplicate, DedupThresholds};
/// use roadwise_types::{IssueCategory, IssueSeverity, ObservationRecord};
///
/// let mut first = ObservationRecord::new(IssueCategory::Pothole, IssueSeverity::Minor, "", 0.8);
/// first.latitude = 28.0;
/// first.longitude = -81.0;
///
/// let mut again = first.clone();
/// again.latitude += 0.0001; // ~11 m north
/// again.monotonic_s += 60.0;
///
/// assert!(is_duplicate(&again, [&first], &DedupThresholds::default()));
/// ```
pub fn is_duplicate<'a>(
    candidate: &ObservationRecord,
    history: impl IntoIterator<Item = &'a ObservationRecord>,
    thresholds: &DedupThresholds,
) -> bool {
    let Some(here) = candidate.location() else {
        return false;
    };
    history.into_iter().any(|prior| {
        prior.category == candidate.category
            && age_s(candidate, prior) <= thresholds.window_s
            && prior
                .location()
                .is_some_and(|there| here.distance_m(&there) <= thresholds.radius_m)
    })
}

fn age_s(candidate: &ObservationRecord, prior: &ObservationRecord) -> f64 {
    (candidate.monotonic_s - prior.monotonic_s).max(0.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// DedupEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of the recent-history ring.
///
/// The ring holds at most `capacity` records; the oldest is evicted first.
pub struct DedupEngine {
    thresholds: DedupThresholds,
    capacity: usize,
    recent: Mutex<VecDeque<ObservationRecord>>,
}

impl Default for DedupEngine {
    fn default() -> Self {
        Self::new(DedupThresholds::default(), DEFAULT_RING_CAPACITY)
    }
}

impl DedupEngine {
    pub fn new(thresholds: DedupThresholds, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            thresholds,
            capacity,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn thresholds(&self) -> &DedupThresholds {
        &self.thresholds
    }

    // Ring mutations are a single pop/push; a poisoned guard is still consistent.
    fn ring(&self) -> MutexGuard<'_, VecDeque<ObservationRecord>> {
        self.recent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check `record` against the ring and remember it when novel.
    ///
    /// Returns `true` when the record was novel (and is now in the ring),
    /// `false` when it repeats a recent sighting.
    pub fn admit(&self, record: &ObservationRecord) -> bool {
        let mut ring = self.ring();
        if is_duplicate(record, ring.iter(), &self.thresholds) {
            debug!(
                category = record.category.as_str(),
                "observation repeats a recent nearby sighting"
            );
            return false;
        }
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(record.clone());
        true
    }

    /// Records currently in the ring, oldest first.
    pub fn recent(&self) -> Vec<ObservationRecord> {
        self.ring().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    /// Ring records within `radius_m` of `point`, nearest first.
    pub fn nearby(&self, point: &GeoPoint, radius_m: f64) -> Vec<(ObservationRecord, f64)> {
        let mut hits: Vec<(ObservationRecord, f64)> = self
            .ring()
            .iter()
            .filter_map(|r| {
                let d = r.location()?.distance_m(point);
                (d <= radius_m).then(|| (r.clone(), d))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
