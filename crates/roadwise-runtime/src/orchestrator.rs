//! [`Orchestrator`] – one advisory cycle, end to end.
//!
//! ```text
//! Idle → BuildingContext → AwaitingReasoning → ExecutingCapabilities
//!      → Merging → Filtering → Published → Idle
//! ```
//!
//! [`Orchestrator::run_cycle`] covers the phases up to and including
//! `Merging`; filtering and publishing belong to the
//! [`AdvisoryLoop`][crate::advisory_loop::AdvisoryLoop], which owns the
//! reference speed and the channels.
//!
//! Failure handling per phase:
//!
//! - **BuildingContext** – a missing camera frame (when one is required)
//!   skips the cycle.
//! - **AwaitingReasoning** – a timeout or backend error ends the cycle with
//!   no merged advisory, so whatever was last published stays published.
//! - **ExecutingCapabilities** – each invocation is isolated: an unknown
//!   name, bad arguments or an execution error costs that invocation only.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roadwise_kernel::CapabilityRegistry;
//! use roadwise_runtime::orchestrator::{Orchestrator, OrchestratorConfig};
//! use roadwise_runtime::reasoning::AnthropicReasoner;
//! use roadwise_types::ContextSnapshot;
//!
//! # async fn demo() {
//! let registry = CapabilityRegistry::new().freeze();
//! let engine = Arc::new(AnthropicReasoner::new(Some("sk-ant-...".into())));
//! let orchestrator = Orchestrator::new(registry, engine, OrchestratorConfig::default());
//! let report = orchestrator.run_cycle(ContextSnapshot::default()).await;
//! println!("{:?}", report.outcome);
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use roadwise_kernel::{CapabilityRegistry, MergePolicy, merge_with};
use roadwise_types::{Advisory, CandidateAdvisory, ContextSnapshot, RoadwiseError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::{build_system_prompt, describe_context, encode_frame};
use crate::publisher::StatusChannel;
use crate::reasoning::{Invocation, ReasoningEngine, ReasoningRequest};

// ─────────────────────────────────────────────────────────────────────────────
// Phases and outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    BuildingContext,
    AwaitingReasoning,
    ExecutingCapabilities,
    Merging,
    Filtering,
    Published,
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// At least one candidate was merged.
    Advised,
    /// The engine answered but nothing it invoked produced a candidate.
    NoCandidates,
    /// Context could not be built; the engine was not called.
    Skipped,
    /// The engine timed out or failed.
    ReasoningFailed,
}

/// Everything a finished cycle hands back to the loop.
#[derive(Debug)]
pub struct CycleReport {
    /// Phases entered, in order.
    pub phases: Vec<CyclePhase>,
    /// `None` when the previous advisory should stay published.
    pub merged: Option<Advisory>,
    pub candidates: Vec<CandidateAdvisory>,
    pub backend: String,
    pub degraded: bool,
    /// Duration of the reasoning call alone.
    pub latency: Duration,
    pub summary: String,
    pub outcome: CycleOutcome,
    pub error: Option<RoadwiseError>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            phases: Vec::new(),
            merged: None,
            candidates: Vec::new(),
            backend: String::new(),
            degraded: false,
            latency: Duration::ZERO,
            summary: String::new(),
            outcome: CycleOutcome::Skipped,
            error: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub reasoning_timeout: Duration,
    /// Skip the cycle when the snapshot has no camera frame.
    pub require_frame: bool,
    pub merge_policy: MergePolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reasoning_timeout: Duration::from_secs(10),
            require_frame: true,
            merge_policy: MergePolicy::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    engine: Arc<dyn ReasoningEngine>,
    system_prompt: String,
    config: OrchestratorConfig,
    status: Option<Arc<StatusChannel>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        engine: Arc<dyn ReasoningEngine>,
        config: OrchestratorConfig,
    ) -> Self {
        let system_prompt = build_system_prompt(&registry);
        Self {
            registry,
            engine,
            system_prompt,
            config,
            status: None,
        }
    }

    /// Mirror phase transitions onto `status`.
    pub fn with_status(mut self, status: Arc<StatusChannel>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<dyn ReasoningEngine> {
        &self.engine
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn enter(&self, report: &mut CycleReport, phase: CyclePhase) {
        debug!(?phase, "cycle phase");
        report.phases.push(phase);
        if let Some(status) = &self.status {
            status.set_phase(phase);
        }
    }

    /// Build the engine request, or explain why the cycle cannot run.
    pub fn build_request(&self, ctx: &ContextSnapshot) -> Result<ReasoningRequest, RoadwiseError> {
        let frame_jpeg_b64 = encode_frame(ctx);
        if self.config.require_frame && frame_jpeg_b64.is_none() {
            return Err(RoadwiseError::ContextUnavailable(
                "no camera frame in snapshot".into(),
            ));
        }
        Ok(ReasoningRequest {
            system: self.system_prompt.clone(),
            context_text: describe_context(ctx),
            frame_jpeg_b64,
            actions: self.registry.action_schemas(),
        })
    }

    /// Run one cycle against `ctx`.  Never fails; see [`CycleReport::outcome`].
    pub async fn run_cycle(&self, ctx: ContextSnapshot) -> CycleReport {
        let mut report = CycleReport::new();

        self.enter(&mut report, CyclePhase::BuildingContext);
        let request = match self.build_request(&ctx) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "cycle skipped");
                report.error = Some(e);
                self.enter(&mut report, CyclePhase::Idle);
                return report;
            }
        };

        self.enter(&mut report, CyclePhase::AwaitingReasoning);
        let started = Instant::now();
        let result =
            tokio::time::timeout(self.config.reasoning_timeout, self.engine.invoke(&request))
                .await
                .unwrap_or_else(|_| {
                    Err(RoadwiseError::ReasoningTimeout(
                        self.config.reasoning_timeout.as_millis() as u64,
                    ))
                });
        report.latency = started.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(backend = self.engine.name(), error = %e, "reasoning failed");
                report.backend = self.engine.name().to_string();
                report.outcome = CycleOutcome::ReasoningFailed;
                report.error = Some(e);
                // Zero candidates: nothing replaces the published advisory.
                self.enter(&mut report, CyclePhase::Merging);
                self.enter(&mut report, CyclePhase::Idle);
                return report;
            }
        };
        debug!(
            backend = %response.backend,
            invocations = response.invocations.len(),
            latency_ms = report.latency.as_millis() as u64,
            "reasoning answered"
        );
        report.backend = response.backend;
        report.degraded = response.degraded;
        report.summary = response.text.unwrap_or_default();

        self.enter(&mut report, CyclePhase::ExecutingCapabilities);
        for invocation in &response.invocations {
            match self.execute(invocation, &ctx).await {
                Ok(candidate) if candidate.is_empty() => {
                    debug!(capability = %invocation.name, "no candidate")
                }
                Ok(candidate) => report.candidates.push(candidate),
                Err(e) => warn!(capability = %invocation.name, error = %e, "capability failed"),
            }
        }

        self.enter(&mut report, CyclePhase::Merging);
        let merged = merge_with(&self.config.merge_policy, &report.candidates);
        report.outcome = if report.candidates.is_empty() {
            CycleOutcome::NoCandidates
        } else {
            info!(
                candidates = report.candidates.len(),
                capabilities = ?merged.capabilities,
                "cycle merged"
            );
            CycleOutcome::Advised
        };
        report.merged = Some(merged);
        report
    }

    async fn execute(
        &self,
        invocation: &Invocation,
        ctx: &ContextSnapshot,
    ) -> Result<CandidateAdvisory, RoadwiseError> {
        let action = self.registry.action(&invocation.name)?;
        let mut candidate = action.execute(&invocation.arguments, ctx).await?;
        candidate.capability = invocation.name.clone();
        candidate.rank = self
            .registry
            .rank_of(&invocation.name)
            .unwrap_or(usize::MAX);
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::ReasoningResponse;
    use async_trait::async_trait;
    use roadwise_kernel::{Action, Capability};
    use roadwise_types::{Frame, MPH_TO_MS, SpeedCandidate};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    /// Answers every call with a fixed response, after an optional delay.
    struct Scripted {
        invocations: Vec<Invocation>,
        delay: Duration,
        fail: bool,
        seen: Mutex<Vec<ReasoningRequest>>,
    }

    impl Scripted {
        fn calling(invocations: Vec<(&str, Value)>) -> Self {
            Self {
                invocations: invocations
                    .into_iter()
                    .map(|(name, arguments)| Invocation {
                        name: name.into(),
                        arguments,
                    })
                    .collect(),
                delay: Duration::ZERO,
                fail: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReasoningEngine for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(
            &self,
            request: &ReasoningRequest,
        ) -> Result<ReasoningResponse, RoadwiseError> {
            self.seen.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(RoadwiseError::ReasoningFailed("boom".into()));
            }
            Ok(ReasoningResponse {
                invocations: self.invocations.clone(),
                text: Some("Highway, light traffic.".into()),
                backend: "scripted".into(),
                degraded: false,
            })
        }
    }

    /// `slow_down {mph, confidence}` → speed candidate.
    struct SlowDown(&'static str);

    #[async_trait]
    impl Action for SlowDown {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            args: &Value,
            _ctx: &ContextSnapshot,
        ) -> Result<CandidateAdvisory, RoadwiseError> {
            let mph = args["mph"].as_f64().ok_or_else(|| RoadwiseError::InvalidArguments {
                name: self.0.into(),
                details: "mph missing".into(),
            })? as f32;
            let confidence = args["confidence"].as_f64().unwrap_or(1.0) as f32;
            Ok(CandidateAdvisory::from_capability("ignored").with_speed(SpeedCandidate {
                target_ms: mph * MPH_TO_MS,
                source: self.0.into(),
                confidence,
                distance_ahead_m: 200.0,
            }))
        }
    }

    fn registry() -> Arc<CapabilityRegistry> {
        let mut r = CapabilityRegistry::new();
        r.register(Capability::Action(Arc::new(SlowDown("first")))).unwrap();
        r.register(Capability::Action(Arc::new(SlowDown("second")))).unwrap();
        r.freeze()
    }

    fn with_frame() -> ContextSnapshot {
        let mut ctx = ContextSnapshot::default();
        ctx.vehicle.speed_ms = 70.0 * MPH_TO_MS;
        ctx.frame = Some(Frame {
            jpeg: vec![0xFF, 0xD8, 0xFF],
        });
        ctx
    }

    #[tokio::test]
    async fn merges_the_lowest_speed_from_two_capabilities() {
        let engine = Arc::new(Scripted::calling(vec![
            ("second", json!({"mph": 45, "confidence": 0.6})),
            ("first", json!({"mph": 35, "confidence": 0.9})),
        ]));
        let orch = Orchestrator::new(registry(), engine.clone(), OrchestratorConfig::default());
        let report = orch.run_cycle(with_frame()).await;

        assert_eq!(report.outcome, CycleOutcome::Advised);
        assert_eq!(report.candidates.len(), 2);
        let merged = report.merged.unwrap();
        assert!((merged.speed.target_ms - 35.0 * MPH_TO_MS).abs() < 1e-4);
        assert_eq!(merged.speed.source, "first");
        assert_eq!(report.summary, "Highway, light traffic.");
        assert_eq!(
            report.phases,
            [
                CyclePhase::BuildingContext,
                CyclePhase::AwaitingReasoning,
                CyclePhase::ExecutingCapabilities,
                CyclePhase::Merging,
            ]
        );

        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen[0].actions.len(), 2);
        assert!(seen[0].frame_jpeg_b64.is_some());
        assert!(seen[0].context_text.contains("70 mph"));
    }

    #[tokio::test]
    async fn candidates_are_attributed_and_ranked_by_registry() {
        let engine = Arc::new(Scripted::calling(vec![("second", json!({"mph": 50}))]));
        let orch = Orchestrator::new(registry(), engine, OrchestratorConfig::default());
        let report = orch.run_cycle(with_frame()).await;
        assert_eq!(report.candidates[0].capability, "second");
        assert_eq!(report.candidates[0].rank, 1);
    }

    #[tokio::test]
    async fn failing_invocations_are_isolated() {
        let engine = Arc::new(Scripted::calling(vec![
            ("nonexistent", json!({})),
            ("first", json!({"no_mph": true})),
            ("second", json!({"mph": 40, "confidence": 0.8})),
        ]));
        let orch = Orchestrator::new(registry(), engine, OrchestratorConfig::default());
        let report = orch.run_cycle(with_frame()).await;
        assert_eq!(report.outcome, CycleOutcome::Advised);
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].capability, "second");
    }

    #[tokio::test]
    async fn missing_frame_skips_the_cycle() {
        let engine = Arc::new(Scripted::calling(vec![]));
        let orch = Orchestrator::new(registry(), engine.clone(), OrchestratorConfig::default());
        let report = orch.run_cycle(ContextSnapshot::default()).await;
        assert_eq!(report.outcome, CycleOutcome::Skipped);
        assert!(matches!(report.error, Some(RoadwiseError::ContextUnavailable(_))));
        assert!(engine.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn frame_can_be_optional() {
        let engine = Arc::new(Scripted::calling(vec![]));
        let config = OrchestratorConfig {
            require_frame: false,
            ..OrchestratorConfig::default()
        };
        let orch = Orchestrator::new(registry(), engine, config);
        let report = orch.run_cycle(ContextSnapshot::default()).await;
        assert_eq!(report.outcome, CycleOutcome::NoCandidates);
        assert!(!report.merged.unwrap().any_active());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_no_advisory() {
        let mut scripted = Scripted::calling(vec![("first", json!({"mph": 30}))]);
        scripted.delay = Duration::from_secs(60);
        let orch = Orchestrator::new(registry(), Arc::new(scripted), OrchestratorConfig::default());
        let report = orch.run_cycle(with_frame()).await;
        assert_eq!(report.outcome, CycleOutcome::ReasoningFailed);
        assert!(report.merged.is_none());
        assert!(matches!(report.error, Some(RoadwiseError::ReasoningTimeout(10_000))));
    }

    #[tokio::test]
    async fn backend_error_yields_no_advisory() {
        let mut scripted = Scripted::calling(vec![]);
        scripted.fail = true;
        let orch = Orchestrator::new(registry(), Arc::new(scripted), OrchestratorConfig::default());
        let report = orch.run_cycle(with_frame()).await;
        assert_eq!(report.outcome, CycleOutcome::ReasoningFailed);
        assert!(report.merged.is_none());
        assert_eq!(report.backend, "scripted");
    }

    #[tokio::test]
    async fn phases_are_mirrored_to_the_status_channel() {
        let status = Arc::new(StatusChannel::new());
        let engine = Arc::new(Scripted::calling(vec![]));
        let orch = Orchestrator::new(registry(), engine, OrchestratorConfig::default())
            .with_status(status.clone());
        orch.run_cycle(with_frame()).await;
        assert_eq!(status.latest().phase, CyclePhase::Merging);
    }
}
