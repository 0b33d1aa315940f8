//! Latest-value output channels.
//!
//! [`AdvisoryChannel`] carries the filtered advisory to the planner and
//! [`StatusChannel`] carries the pipeline's health.  Both are
//! `tokio::sync::watch` channels: a reader always sees the most recent value
//! and never waits, and a slow reader never holds back the writer.
//!
//! # Example
//!
//! ```
//! use roadwise_kernel::SafetyFilter;
//! use roadwise_runtime::publisher::AdvisoryChannel;
//!
//! let channel = AdvisoryChannel::new();
//! let rx = channel.subscribe();
//! let seq = channel.publish(SafetyFilter::default().empty());
//! assert_eq!(seq, 1);
//! assert_eq!(rx.borrow().seq, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use roadwise_kernel::FilteredAdvisory;
use roadwise_types::{Advisory, truncate_chars};
use serde::Serialize;
use tokio::sync::watch;

use crate::orchestrator::CyclePhase;

/// Longest scene summary carried on the status channel.
pub const SUMMARY_MAX_CHARS: usize = 200;

// ─────────────────────────────────────────────────────────────────────────────
// Advisory channel
// ─────────────────────────────────────────────────────────────────────────────

/// One message on the advisory channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedAdvisory {
    /// Monotonic per channel, starting at 1; 0 means nothing published yet.
    pub seq: u64,
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub advisory: Advisory,
}

impl Default for PublishedAdvisory {
    fn default() -> Self {
        Self {
            seq: 0,
            published_at: Utc::now(),
            advisory: Advisory::default(),
        }
    }
}

/// Publishes [`FilteredAdvisory`] values; nothing unfiltered can be sent.
pub struct AdvisoryChannel {
    tx: watch::Sender<PublishedAdvisory>,
    seq: AtomicU64,
}

impl AdvisoryChannel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PublishedAdvisory::default());
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Replace the current value and return its sequence number.
    pub fn publish(&self, advisory: FilteredAdvisory) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.tx.send_replace(PublishedAdvisory {
            seq,
            published_at: Utc::now(),
            advisory: advisory.into_inner(),
        });
        seq
    }

    pub fn subscribe(&self) -> watch::Receiver<PublishedAdvisory> {
        self.tx.subscribe()
    }

    /// The most recently published message.
    pub fn latest(&self) -> PublishedAdvisory {
        self.tx.borrow().clone()
    }
}

impl Default for AdvisoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status channel
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Initializing,
    /// Cycles complete on the primary backend.
    Active,
    /// Cycles complete on a fallback backend.
    Degraded,
    /// The host system is not engaged; no cycles run.
    Disabled,
    /// The last cycle failed.
    Error,
}

/// Health of the pipeline, published alongside the advisory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub backend: String,
    /// Duration of the last completed reasoning call.
    pub latency_ms: u64,
    /// Engine's scene summary, at most [`SUMMARY_MAX_CHARS`].
    pub summary: String,
    pub phase: CyclePhase,
}

pub struct StatusChannel {
    tx: watch::Sender<AgentStatus>,
}

impl StatusChannel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AgentStatus::default());
        Self { tx }
    }

    /// Publish `status`, truncating the summary.  Unchanged values do not
    /// wake readers.
    pub fn publish(&self, mut status: AgentStatus) {
        status.summary = truncate_chars(&status.summary, SUMMARY_MAX_CHARS);
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Update only the phase.
    pub fn set_phase(&self, phase: CyclePhase) {
        self.tx.send_if_modified(|current| {
            let changed = current.phase != phase;
            current.phase = phase;
            changed
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentStatus> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> AgentStatus {
        self.tx.borrow().clone()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}
