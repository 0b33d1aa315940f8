//! `roadwise-kernel` – Safety & Arbitration
//!
//! The part of Roadwise that does not think: it decides which capabilities
//! exist, how conflicting recommendations are resolved, and what is allowed
//! to reach the planner.
//!
//! # Modules
//!
//! - [`capability_registry`] – [`CapabilityRegistry`][capability_registry::CapabilityRegistry]:
//!   the ordered, name-unique catalogue of [`Action`][capability_registry::Action]s
//!   and [`Knowledge`][capability_registry::Knowledge] fragments, frozen after
//!   startup.
//! - [`merge`] – pure precedence rules folding a cycle's
//!   [`CandidateAdvisory`][roadwise_types::CandidateAdvisory] list into a
//!   single [`Advisory`][roadwise_types::Advisory].
//! - [`safety_filter`] – [`SafetyFilter`][safety_filter::SafetyFilter]:
//!   the single chokepoint that clamps speeds, limits step changes, gates
//!   low-confidence axes and produces the only type the advisory channel
//!   accepts, [`FilteredAdvisory`][safety_filter::FilteredAdvisory].

pub mod capability_registry;
pub mod merge;
pub mod safety_filter;

pub use capability_registry::{Action, ActionSchema, Capability, CapabilityRegistry, Knowledge};
pub use merge::{MergePolicy, merge, merge_with};
pub use safety_filter::{FilteredAdvisory, SafetyFilter, SafetyLimits};
