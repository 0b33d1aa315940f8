//! `roadwise-runtime` – The Advisory Pipeline
//!
//! Where the reasoning happens: context in, engine call out, actions
//! executed, candidates merged and filtered, advisory published.
//!
//! # Modules
//!
//! - [`advisory_loop`] – [`AdvisoryLoop`][advisory_loop::AdvisoryLoop]:
//!   the fixed-rate publish loop.  Spawns reasoning cycles in the background,
//!   drains their results without waiting, abandons cycles past their
//!   deadline and expires stale advisories.
//! - [`orchestrator`] – [`Orchestrator`][orchestrator::Orchestrator]:
//!   one cycle end to end, from building the engine request through
//!   executing the invoked actions to the merged advisory.
//! - [`reasoning`] – [`ReasoningEngine`][reasoning::ReasoningEngine] and its
//!   backends: the Anthropic Messages API, any OpenAI-compatible endpoint
//!   (including local [Ollama](https://ollama.com) servers), and an ordered
//!   fallback chain.
//! - [`capabilities`] – the built-in actions and knowledge fragments, and
//!   [`register_defaults`][capabilities::register_defaults] to load them in
//!   their fixed order.
//! - [`context`] – [`ContextSource`][context::ContextSource], the inbound
//!   seam, and the text rendering of a snapshot for the engine.
//! - [`publisher`] – latest-value advisory and status channels.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.
//!
//! # Safety gating
//!
//! Every advisory the loop publishes has passed through
//! [`SafetyFilter::apply`]: the advisory channel only accepts a
//! [`FilteredAdvisory`][roadwise_kernel::FilteredAdvisory].  [`SafetyFilter`]
//! is re-exported here so callers wiring the loop need no direct dependency
//! on `roadwise-kernel`.

pub mod advisory_loop;
pub mod capabilities;
pub mod context;
pub mod orchestrator;
pub mod publisher;
pub mod reasoning;
pub mod telemetry;

pub use advisory_loop::{AdvisoryLoop, AdvisoryLoopConfig};
pub use capabilities::{SourceHub, register_defaults};
pub use context::ContextSource;
pub use orchestrator::{CycleOutcome, CyclePhase, CycleReport, Orchestrator, OrchestratorConfig};
pub use publisher::{AdvisoryChannel, AgentState, AgentStatus, PublishedAdvisory, StatusChannel};
pub use reasoning::{
    AnthropicReasoner, FallbackReasoner, OpenAiCompatReasoner, ReasoningEngine, ReasoningRequest,
    ReasoningResponse,
};
pub use telemetry::{TracerProviderGuard, init_tracing};

pub use roadwise_kernel::SafetyFilter;
