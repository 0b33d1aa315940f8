//! [`ObservationStore`] – the two persistence tiers behind one call.
//!
//! [`ObservationStore::record`] runs the duplicate check, keeps novel records
//! in the [`DedupEngine`] ring and appends them to the [`ObservationLog`].
//! The tiers are independent: a log failure is reported and logged but the
//! ring still holds the record, and a duplicate is never written to either.

use std::sync::{Mutex, PoisonError};

use roadwise_types::{GeoPoint, ObservationRecord};
use serde::Serialize;
use tracing::{info, warn};

use crate::dedup::DedupEngine;
use crate::observation_log::ObservationLog;

/// What happened to a submitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Novel; held in the ring.  `persisted` is `false` when the log append
    /// failed or no log is attached.
    Recorded { persisted: bool },
    /// Repeats a recent nearby sighting; stored nowhere.
    Duplicate,
}

impl RecordOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// Ring plus durable log.
pub struct ObservationStore {
    dedup: DedupEngine,
    log: Option<Mutex<ObservationLog>>,
}

impl ObservationStore {
    /// Store backed by `dedup` and an optional durable `log`.
    pub fn new(dedup: DedupEngine, log: Option<ObservationLog>) -> Self {
        Self {
            dedup,
            log: log.map(Mutex::new),
        }
    }

    /// Ring-only store with default thresholds, for tests and degraded mode.
    pub fn ephemeral() -> Self {
        Self::new(DedupEngine::default(), None)
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    /// Deduplicate and persist `record`.
    pub fn record(&self, record: &ObservationRecord) -> RecordOutcome {
        if !self.dedup.admit(record) {
            return RecordOutcome::Duplicate;
        }

        let persisted = match &self.log {
            Some(log) => {
                let log = log.lock().unwrap_or_else(PoisonError::into_inner);
                match log.append(record) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(id = %record.id, error = %e, "observation log append failed");
                        false
                    }
                }
            }
            None => false,
        };

        info!(
            id = %record.id,
            category = record.category.as_str(),
            severity = ?record.severity,
            has_fix = record.location().is_some(),
            persisted,
            "observation recorded"
        );
        RecordOutcome::Recorded { persisted }
    }

    /// Recent ring records within `radius_m` of `point`, nearest first.
    pub fn nearby(&self, point: &GeoPoint, radius_m: f64) -> Vec<(ObservationRecord, f64)> {
        self.dedup.nearby(point, radius_m)
    }

    /// Number of records in the durable log, `None` without a usable log.
    pub fn persisted_count(&self) -> Option<u64> {
        let log = self.log.as_ref()?;
        let log = log.lock().unwrap_or_else(PoisonError::into_inner);
        match log.count() {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "observation log count failed");
                None
            }
        }
    }
}
