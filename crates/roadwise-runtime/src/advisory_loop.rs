//! [`AdvisoryLoop`] – the fixed-rate publish loop.
//!
//! Reasoning takes seconds; the planner wants an answer several times a
//! second.  The loop therefore never waits on a cycle.  Each tick:
//!
//! 1. **Snapshot** – read the current context from the [`ContextSource`].
//! 2. **Drain** – collect finished cycles from the result channel with
//!    `try_recv`.  A result whose cycle id is not the one in flight belongs
//!    to an abandoned cycle and is discarded.
//! 3. **Filter** – a merged advisory is passed through the [`SafetyFilter`]
//!    with the last published target (or the vehicle speed) as reference.
//! 4. **Abandon** – a cycle running past `cycle_deadline` is detached.  It
//!    is never aborted, so side effects it already committed (stored
//!    observations) stay committed.
//! 5. **Spawn** – when the host system is enabled, a reasoning backend is
//!    available and no cycle is in flight, a new cycle starts as a background
//!    task.  Without a backend the status reads `disabled`.
//! 6. **Publish** – the latest filtered advisory is republished; once it is
//!    older than `advisory_max_age` an empty advisory goes out instead.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roadwise_kernel::SafetyFilter;
//! use roadwise_runtime::advisory_loop::{AdvisoryLoop, AdvisoryLoopConfig};
//! use roadwise_runtime::context::ContextSource;
//! use roadwise_runtime::orchestrator::Orchestrator;
//! use roadwise_runtime::publisher::{AdvisoryChannel, StatusChannel};
//!
//! # async fn demo(source: Arc<dyn ContextSource>, orchestrator: Orchestrator) {
//! let advisories = Arc::new(AdvisoryChannel::new());
//! let status = Arc::new(StatusChannel::new());
//! let agent = AdvisoryLoop::new(
//!     source,
//!     Arc::new(orchestrator),
//!     SafetyFilter::default(),
//!     advisories.clone(),
//!     status,
//!     AdvisoryLoopConfig::default(),
//! );
//! let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//! agent.run(stop_rx).await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use roadwise_kernel::{FilteredAdvisory, SafetyFilter};
use roadwise_types::ContextSnapshot;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::context::ContextSource;
use crate::orchestrator::{CycleOutcome, CyclePhase, CycleReport, Orchestrator};
use crate::publisher::{AdvisoryChannel, AgentState, StatusChannel};

/// Status summary while no reasoning backend can be tried.
pub const NO_BACKEND_SUMMARY: &str = "No backend available";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryLoopConfig {
    /// Publish rate in ticks per second.
    pub rate_hz: f64,
    /// A cycle still running after this long is abandoned.
    pub cycle_deadline: Duration,
    /// A filtered advisory older than this is replaced by an empty one.
    pub advisory_max_age: Duration,
}

impl Default for AdvisoryLoopConfig {
    fn default() -> Self {
        Self {
            rate_hz: 2.0,
            cycle_deadline: Duration::from_secs(15),
            advisory_max_age: Duration::from_secs(30),
        }
    }
}

impl AdvisoryLoopConfig {
    pub fn period(&self) -> Duration {
        let hz = if self.rate_hz.is_finite() && self.rate_hz > 0.0 {
            self.rate_hz
        } else {
            2.0
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AdvisoryLoop
// ─────────────────────────────────────────────────────────────────────────────

struct InFlight {
    id: u64,
    started: Instant,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Sequence number of the advisory published this tick.
    pub seq: u64,
    pub spawned: bool,
    /// Results of abandoned cycles thrown away this tick.
    pub discarded: usize,
}

pub struct AdvisoryLoop {
    source: Arc<dyn ContextSource>,
    orchestrator: Arc<Orchestrator>,
    filter: SafetyFilter,
    advisories: Arc<AdvisoryChannel>,
    status: Arc<StatusChannel>,
    config: AdvisoryLoopConfig,
    results_tx: mpsc::UnboundedSender<(u64, CycleReport)>,
    results_rx: mpsc::UnboundedReceiver<(u64, CycleReport)>,
    next_cycle_id: u64,
    in_flight: Option<InFlight>,
    latest: Option<(FilteredAdvisory, Instant)>,
}

impl AdvisoryLoop {
    pub fn new(
        source: Arc<dyn ContextSource>,
        orchestrator: Arc<Orchestrator>,
        filter: SafetyFilter,
        advisories: Arc<AdvisoryChannel>,
        status: Arc<StatusChannel>,
        config: AdvisoryLoopConfig,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            source,
            orchestrator,
            filter,
            advisories,
            status,
            config,
            results_tx,
            results_rx,
            next_cycle_id: 0,
            in_flight: None,
            latest: None,
        }
    }

    /// `true` while a reasoning cycle is running in the background.
    pub fn cycle_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Run one tick.  Never waits on reasoning.
    pub async fn tick(&mut self) -> TickSummary {
        let mut summary = TickSummary::default();

        let snapshot = match self.source.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "context unavailable this tick");
                None
            }
        };

        while let Ok((id, report)) = self.results_rx.try_recv() {
            if self.in_flight.as_ref().is_some_and(|f| f.id == id) {
                self.in_flight = None;
                self.absorb(report, snapshot.as_ref());
            } else {
                debug!(cycle = id, "late result of abandoned cycle discarded");
                summary.discarded += 1;
            }
        }

        if let Some(flight) = &self.in_flight {
            if flight.started.elapsed() > self.config.cycle_deadline {
                warn!(
                    cycle = flight.id,
                    deadline_ms = self.config.cycle_deadline.as_millis() as u64,
                    "cycle exceeded deadline, abandoned"
                );
                self.in_flight = None;
            }
        }

        match snapshot {
            Some(snapshot) if !snapshot.system.enabled => {
                self.set_state(AgentState::Disabled);
            }
            Some(_) if !self.orchestrator.engine().is_available() => {
                self.report_no_backend();
            }
            Some(snapshot) if self.in_flight.is_none() => {
                self.spawn_cycle(snapshot);
                summary.spawned = true;
            }
            _ => {}
        }

        summary.seq = self.advisories.publish(self.current());
        summary
    }

    /// Tick at the configured rate until `shutdown` turns `true` or its
    /// sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(rate_hz = self.config.rate_hz, "advisory loop started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.advisories.publish(self.filter.empty());
        info!("advisory loop stopped");
    }

    fn spawn_cycle(&mut self, snapshot: ContextSnapshot) {
        self.next_cycle_id += 1;
        let id = self.next_cycle_id;
        let orchestrator = self.orchestrator.clone();
        let tx = self.results_tx.clone();
        tokio::spawn(async move {
            let report = orchestrator.run_cycle(snapshot).await;
            // The loop may be gone by now.
            let _ = tx.send((id, report));
        });
        debug!(cycle = id, "cycle spawned");
        self.in_flight = Some(InFlight {
            id,
            started: Instant::now(),
        });
    }

    fn absorb(&mut self, report: CycleReport, snapshot: Option<&ContextSnapshot>) {
        let mut status = self.status.latest();
        match report.outcome {
            CycleOutcome::Skipped => {}
            CycleOutcome::ReasoningFailed => {
                status.state = AgentState::Error;
                status.backend = report.backend.clone();
            }
            CycleOutcome::Advised | CycleOutcome::NoCandidates => {
                status.state = if report.degraded {
                    AgentState::Degraded
                } else {
                    AgentState::Active
                };
                status.backend = report.backend.clone();
                status.latency_ms = report.latency.as_millis() as u64;
                status.summary = report.summary.clone();
            }
        }

        if let Some(merged) = report.merged {
            status.phase = CyclePhase::Filtering;
            self.status.publish(status.clone());

            let published = self.advisories.latest().advisory;
            let reference = if published.speed.active {
                Some(published.speed.target_ms)
            } else {
                snapshot.map(|s| s.vehicle.speed_ms)
            };
            let filtered = self.filter.apply(&merged, reference);
            if filtered.any_active() {
                info!(
                    speed = filtered.speed.active,
                    lane = filtered.lane.active,
                    alert = filtered.alert.active,
                    capabilities = ?filtered.capabilities,
                    "advisory ready"
                );
            }
            self.latest = Some((filtered, Instant::now()));
            status.phase = CyclePhase::Published;
        } else {
            status.phase = CyclePhase::Idle;
        }
        self.status.publish(status);
    }

    /// The advisory to publish now.
    fn current(&self) -> FilteredAdvisory {
        match &self.latest {
            Some((advisory, at)) if at.elapsed() <= self.config.advisory_max_age => {
                advisory.clone()
            }
            Some(_) => {
                debug!("advisory expired");
                self.filter.empty()
            }
            None => self.filter.empty(),
        }
    }

    fn set_state(&self, state: AgentState) {
        let mut status = self.status.latest();
        status.state = state;
        self.status.publish(status);
    }

    fn report_no_backend(&self) {
        let mut status = self.status.latest();
        if status.state != AgentState::Disabled {
            warn!("no reasoning backend available, cycles paused");
        }
        status.state = AgentState::Disabled;
        status.backend = self.orchestrator.engine().name().to_string();
        status.summary = NO_BACKEND_SUMMARY.to_string();
        self.status.publish(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::advisory::SetSpeedAdvisory;
    use crate::orchestrator::OrchestratorConfig;
    use crate::reasoning::{
        FallbackReasoner, Invocation, ReasoningEngine, ReasoningRequest, ReasoningResponse,
    };
    use async_trait::async_trait;
    use roadwise_kernel::{Capability, CapabilityRegistry};
    use roadwise_types::{MPH_TO_MS, RoadwiseError};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FixedSource(Mutex<ContextSnapshot>);

    #[async_trait]
    impl ContextSource for FixedSource {
        async fn snapshot(&self) -> Result<ContextSnapshot, RoadwiseError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    /// Pops one scripted `(delay, answer)` per call; fails once the script
    /// runs out.
    struct Script {
        answers: Mutex<VecDeque<(Duration, ReasoningResponse)>>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ReasoningEngine for Script {
        fn name(&self) -> &str {
            "script"
        }

        async fn invoke(&self, _r: &ReasoningRequest) -> Result<ReasoningResponse, RoadwiseError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.answers.lock().unwrap().pop_front();
            let (delay, answer) =
                next.ok_or_else(|| RoadwiseError::ReasoningFailed("script exhausted".into()))?;
            tokio::time::sleep(delay).await;
            Ok(answer)
        }
    }

    fn slow_to(mph: f32) -> ReasoningResponse {
        ReasoningResponse {
            invocations: vec![Invocation {
                name: "set_speed_advisory".into(),
                arguments: json!({"speed_mph": mph, "reason": "construction_zone", "confidence": 0.9}),
            }],
            text: Some("Cones ahead.".into()),
            backend: "script".into(),
            degraded: false,
        }
    }

    struct Harness {
        agent: AdvisoryLoop,
        engine: Arc<Script>,
        source: Arc<FixedSource>,
        advisories: Arc<AdvisoryChannel>,
        status: Arc<StatusChannel>,
    }

    fn harness(answers: Vec<(Duration, ReasoningResponse)>, speed_ms: f32) -> Harness {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(Capability::Action(Arc::new(SetSpeedAdvisory)))
            .unwrap();
        let engine = Arc::new(Script {
            answers: Mutex::new(answers.into()),
            calls: Mutex::new(0),
        });
        let orchestrator = Orchestrator::new(
            registry.freeze(),
            engine.clone(),
            OrchestratorConfig {
                require_frame: false,
                reasoning_timeout: Duration::from_secs(120),
                ..OrchestratorConfig::default()
            },
        );
        let mut ctx = ContextSnapshot::default();
        ctx.vehicle.speed_ms = speed_ms;
        ctx.system.enabled = true;
        let source = Arc::new(FixedSource(Mutex::new(ctx)));
        let advisories = Arc::new(AdvisoryChannel::new());
        let status = Arc::new(StatusChannel::new());
        let agent = AdvisoryLoop::new(
            source.clone(),
            Arc::new(orchestrator),
            SafetyFilter::default(),
            advisories.clone(),
            status.clone(),
            AdvisoryLoopConfig::default(),
        );
        Harness {
            agent,
            engine,
            source,
            advisories,
            status,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_empty_then_the_cycle_result() {
        let mut h = harness(vec![(Duration::ZERO, slow_to(35.0))], 70.0 * MPH_TO_MS);

        let first = h.agent.tick().await;
        assert!(first.spawned);
        assert_eq!(first.seq, 1);
        assert!(!h.advisories.latest().advisory.any_active());

        settle().await;
        let second = h.agent.tick().await;
        assert_eq!(second.seq, 2);
        let published = h.advisories.latest().advisory;
        assert!(published.speed.active);
        assert!((published.speed.target_ms - 35.0 * MPH_TO_MS).abs() < 1e-3);

        let status = h.status.latest();
        assert_eq!(status.state, AgentState::Active);
        assert_eq!(status.backend, "script");
        assert_eq!(status.summary, "Cones ahead.");
    }

    #[tokio::test(start_paused = true)]
    async fn large_drops_are_step_limited_against_vehicle_speed() {
        let mut h = harness(vec![(Duration::ZERO, slow_to(35.0))], 45.0);
        h.agent.tick().await;
        settle().await;
        h.agent.tick().await;
        let published = h.advisories.latest().advisory;
        assert_eq!(published.speed.target_ms, 25.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_the_previous_advisory_until_it_expires() {
        let mut h = harness(vec![(Duration::ZERO, slow_to(50.0))], 30.0);
        h.agent.tick().await;
        settle().await;
        h.agent.tick().await; // absorbs the advisory, spawns a cycle that fails
        settle().await;
        h.agent.tick().await; // absorbs the failure
        assert!(h.advisories.latest().advisory.speed.active);
        assert_eq!(h.status.latest().state, AgentState::Error);

        tokio::time::sleep(Duration::from_secs(31)).await;
        h.agent.tick().await;
        assert!(!h.advisories.latest().advisory.any_active());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycles_are_abandoned_and_their_results_discarded() {
        let mut h = harness(
            vec![
                (Duration::from_secs(20), slow_to(20.0)),
                (Duration::from_secs(1), slow_to(40.0)),
            ],
            30.0,
        );
        assert!(h.agent.tick().await.spawned);
        settle().await;
        assert!(!h.agent.tick().await.spawned);

        tokio::time::sleep(Duration::from_secs(16)).await;
        let t = h.agent.tick().await;
        assert!(t.spawned, "deadline passed, a new cycle starts");
        settle().await;
        assert_eq!(*h.engine.calls.lock().unwrap(), 2);

        // The second cycle answers at ~17 s, the abandoned first one at 20 s.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let t = h.agent.tick().await;
        assert_eq!(t.discarded, 1);
        let published = h.advisories.latest().advisory;
        assert!((published.speed.target_ms - 40.0 * MPH_TO_MS).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_system_runs_no_cycles() {
        let mut h = harness(vec![(Duration::ZERO, slow_to(35.0))], 30.0);
        h.source.0.lock().unwrap().system.enabled = false;
        let t = h.agent.tick().await;
        assert!(!t.spawned);
        settle().await;
        assert_eq!(*h.engine.calls.lock().unwrap(), 0);
        assert_eq!(h.status.latest().state, AgentState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_and_clears_the_channel() {
        let h = harness(vec![(Duration::ZERO, slow_to(35.0))], 30.0);
        let advisories = h.advisories.clone();
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(h.agent.run(stop_rx));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(advisories.latest().seq >= 3);
        stop.send(true).unwrap();
        task.await.unwrap();
        assert!(!advisories.latest().advisory.any_active());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_backend_reports_disabled_without_cycling() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(Capability::Action(Arc::new(SetSpeedAdvisory)))
            .unwrap();
        let orchestrator = Orchestrator::new(
            registry.freeze(),
            Arc::new(FallbackReasoner::new(Vec::new())),
            OrchestratorConfig {
                require_frame: false,
                ..OrchestratorConfig::default()
            },
        );
        let mut ctx = ContextSnapshot::default();
        ctx.system.enabled = true;
        let status = Arc::new(StatusChannel::new());
        let advisories = Arc::new(AdvisoryChannel::new());
        let mut agent = AdvisoryLoop::new(
            Arc::new(FixedSource(Mutex::new(ctx))),
            Arc::new(orchestrator),
            SafetyFilter::default(),
            advisories.clone(),
            status.clone(),
            AdvisoryLoopConfig::default(),
        );

        for _ in 0..3 {
            let t = agent.tick().await;
            assert!(!t.spawned);
            assert!(!agent.cycle_in_flight());
            settle().await;
        }
        let latest = status.latest();
        assert_eq!(latest.state, AgentState::Disabled);
        assert_eq!(latest.backend, "none");
        assert_eq!(latest.summary, NO_BACKEND_SUMMARY);
        assert_eq!(advisories.latest().seq, 3);
        assert!(!advisories.latest().advisory.any_active());
    }

    #[test]
    fn period_follows_rate() {
        let config = AdvisoryLoopConfig::default();
        assert_eq!(config.period(), Duration::from_millis(500));
        let broken = AdvisoryLoopConfig {
            rate_hz: 0.0,
            ..AdvisoryLoopConfig::default()
        };
        assert_eq!(broken.period(), Duration::from_millis(500));
    }
}
