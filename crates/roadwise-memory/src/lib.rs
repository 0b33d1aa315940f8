//! `roadwise-memory` – Road Observation Memory.
//!
//! Keeps on-board road-condition sightings: a bounded in-memory history for
//! duplicate suppression and a durable SQLite log of everything novel.
//!
//! # Modules
//!
//! - [`dedup`] – [`DedupEngine`][dedup::DedupEngine]: owns the recent-history
//!   ring and decides whether a sighting repeats a nearby recent one.
//! - [`observation_log`] – [`ObservationLog`][observation_log::ObservationLog]:
//!   append-only SQLite record store.
//! - [`store`] – [`ObservationStore`][store::ObservationStore]: runs both tiers
//!   behind a single `record` call, isolating failures of either.

pub mod dedup;
pub mod observation_log;
pub mod store;

pub use dedup::{DedupEngine, DedupThresholds, is_duplicate};
pub use observation_log::{ObservationLog, ObservationLogError};
pub use store::{ObservationStore, RecordOutcome};
