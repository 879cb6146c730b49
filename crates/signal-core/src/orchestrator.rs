//! Dual-session run orchestration.
//!
//! [`DualOrchestrator::run`] executes one run invocation:
//!
//! 1. Prepare the route file once (same seed, same bytes for every session).
//! 2. Launch one engine session per participating controller, each with its
//!    own label, and bind phase controllers to every intersection.
//! 3. Loop while `tick < max_ticks` and no stop was requested: step the
//!    adaptive session fully, then the fixed one, record both tick metrics,
//!    and publish a snapshot to the outbound queue.
//! 4. Close every session (best-effort) and reduce the metrics.
//!
//! Run failures never cross this boundary. A failed run still yields a
//! [`RunReport`], carrying whatever completed plus the diagnostic.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use signal_types::{
    ControllerKind, EndReason, MetricsRecord, RunId, RunReport, Strategy, TickMetrics,
};
use tracing::{error, info, warn};

use crate::bridge::{BridgeError, SessionBridge};
use crate::config::ControlConfig;
use crate::demand::{DemandError, DemandSource};
use crate::engine::{EngineError, EngineLauncher, SessionSpec};
use crate::metrics::{LiveMetrics, MetricsAggregator};
use crate::operator::RunControl;
use crate::outbound::OutboundQueue;
use crate::policy::Policy;

/// Reasons a run invocation is aborted.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Another run is executing on the same control state.
    #[error("a run is already in progress")]
    AlreadyRunning,

    /// Adaptive control was requested without a policy.
    #[error("adaptive control requested but no policy is loaded")]
    MissingPolicy,

    /// The route file could not be produced.
    #[error("demand preparation failed: {source}")]
    Demand {
        /// The underlying demand error.
        #[from]
        source: DemandError,
    },

    /// An engine session could not be started.
    #[error("failed to start session '{label}': {source}")]
    Launch {
        /// Session label.
        label: String,
        /// The underlying engine error.
        source: EngineError,
    },

    /// Controllers could not be bound to a session.
    #[error("failed to bind controllers: {source}")]
    Bridge {
        /// The underlying bridge error.
        #[from]
        source: BridgeError,
    },

    /// A session failed to advance.
    #[error("session '{label}' failed at tick {tick}: {source}")]
    Step {
        /// Session label.
        label: String,
        /// Tick being executed.
        tick: u64,
        /// The underlying engine error.
        source: EngineError,
    },
}

/// Timing and sizing parameters of a run, resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    /// Tick limit.
    pub max_ticks: u64,
    /// State vector length.
    pub num_states: usize,
    /// Number of actions.
    pub num_actions: usize,
    /// Green hold of the adaptive controller.
    pub green_duration_adaptive: u64,
    /// Green hold of the fixed-time controller.
    pub green_duration_fixed: u64,
    /// Clearance length for both controllers.
    pub clearance_duration: u64,
    /// Ticks between progress log lines (0 disables them).
    pub progress_log_interval: u64,
    /// Downsampling stride for comparison time series.
    pub series_stride: usize,
}

impl RunPlan {
    /// Resolve from the `simulation` config section.
    pub fn from_config(config: &ControlConfig) -> Self {
        Self {
            max_ticks: config.max_ticks,
            num_states: config.num_states,
            num_actions: config.num_actions,
            green_duration_adaptive: u64::from(config.green_duration_adaptive),
            green_duration_fixed: u64::from(config.green_duration_fixed),
            clearance_duration: u64::from(config.clearance_duration),
            progress_log_interval: config.progress_log_interval,
            series_stride: config.series_stride,
        }
    }

    /// Green hold for a controller family.
    pub const fn green_duration(&self, kind: ControllerKind) -> u64 {
        match kind {
            ControllerKind::Adaptive => self.green_duration_adaptive,
            ControllerKind::Fixed => self.green_duration_fixed,
        }
    }

    /// Copy with a different tick limit.
    #[must_use]
    pub const fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }
}

impl Default for RunPlan {
    fn default() -> Self {
        Self::from_config(&ControlConfig::default())
    }
}

/// Drives one or two sessions in lockstep and produces run reports.
pub struct DualOrchestrator {
    plan: RunPlan,
    launcher: Box<dyn EngineLauncher>,
    demand: Box<dyn DemandSource>,
    policy: Option<Arc<dyn Policy>>,
    demand_seed: u64,
    engine_seed: u64,
    control: Arc<RunControl>,
    outbound: Arc<OutboundQueue>,
    live: Arc<LiveMetrics>,
}

impl std::fmt::Debug for DualOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualOrchestrator")
            .field("plan", &self.plan)
            .field("has_policy", &self.policy.is_some())
            .field("demand_seed", &self.demand_seed)
            .field("engine_seed", &self.engine_seed)
            .finish_non_exhaustive()
    }
}

impl DualOrchestrator {
    /// Orchestrator with fresh control state and a default outbound queue.
    pub fn new(
        plan: RunPlan,
        launcher: Box<dyn EngineLauncher>,
        demand: Box<dyn DemandSource>,
    ) -> Self {
        Self {
            plan,
            launcher,
            demand,
            policy: None,
            demand_seed: 42,
            engine_seed: 42,
            control: Arc::new(RunControl::new()),
            outbound: Arc::new(OutboundQueue::default()),
            live: Arc::new(LiveMetrics::new(plan.series_stride)),
        }
    }

    /// Policy used by the adaptive controller.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Seeds for demand generation and for the engine.
    #[must_use]
    pub const fn with_seeds(mut self, demand_seed: u64, engine_seed: u64) -> Self {
        self.demand_seed = demand_seed;
        self.engine_seed = engine_seed;
        self
    }

    /// Share existing control state.
    #[must_use]
    pub fn with_control(mut self, control: Arc<RunControl>) -> Self {
        self.control = control;
        self
    }

    /// Publish into an existing outbound queue.
    #[must_use]
    pub fn with_outbound(mut self, outbound: Arc<OutboundQueue>) -> Self {
        self.outbound = outbound;
        self
    }

    /// Control state shared with the run loop.
    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    /// Outbound queue the run loop publishes into.
    pub fn outbound(&self) -> Arc<OutboundQueue> {
        Arc::clone(&self.outbound)
    }

    /// Run plan.
    pub const fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Metrics of the run in progress, or of the last one once it ends.
    pub fn live(&self) -> Arc<LiveMetrics> {
        Arc::clone(&self.live)
    }

    /// Per-tick metrics of the most recent run.
    pub fn last_metrics(&self) -> MetricsAggregator {
        self.live.snapshot()
    }

    /// Execute one run invocation. Never fails; see [`RunReport::error`].
    pub fn run(&mut self, strategy: Strategy) -> RunReport {
        self.run_with_id(RunId::new(), strategy)
    }

    /// Execute one run invocation under a caller-chosen id.
    pub fn run_with_id(&mut self, run_id: RunId, strategy: Strategy) -> RunReport {
        if !self.control.begin() {
            warn!(run_id = %run_id, "Run rejected: another run is in progress");
            let mut report = RunReport::empty(run_id, strategy, Utc::now());
            report.end_reason = Some(EndReason::Failed);
            report.error = Some(RunError::AlreadyRunning.to_string());
            return report;
        }
        self.run_claimed(run_id, strategy)
    }

    /// Execute a run the caller already claimed with [`RunControl::begin`].
    ///
    /// Does not touch the stop flag before the loop, so a stop requested
    /// between the claim and this call is honoured at the first tick
    /// boundary. Releases the claim when the run ends.
    pub fn run_claimed(&mut self, run_id: RunId, strategy: Strategy) -> RunReport {
        let report = self.execute(run_id, strategy, Utc::now());
        self.control.finish();
        report
    }

    fn execute(
        &mut self,
        run_id: RunId,
        strategy: Strategy,
        started_at: chrono::DateTime<Utc>,
    ) -> RunReport {
        let mut report = RunReport::empty(run_id, strategy, started_at);
        self.live.reset();
        info!(
            run_id = %run_id,
            strategy = ?strategy,
            max_ticks = self.plan.max_ticks,
            "Run starting"
        );

        let mut bridges = match self.start_sessions(strategy) {
            Ok(bridges) => bridges,
            Err(err) => {
                error!(run_id = %run_id, error = %err, "Run aborted during startup");
                report.end_reason = Some(EndReason::Failed);
                report.error = Some(err.to_string());
                return report;
            }
        };

        let started = Instant::now();
        let mut tick: u64 = 0;
        let mut end_reason = EndReason::MaxTicksReached;
        let mut failure: Option<RunError> = None;

        while tick < self.plan.max_ticks {
            if self.control.is_stop_requested() {
                end_reason = EndReason::OperatorStop;
                info!(run_id = %run_id, tick, "Stop requested, ending run");
                break;
            }

            let mut snapshot: Vec<(ControllerKind, TickMetrics)> = Vec::with_capacity(2);
            for bridge in &mut bridges {
                match bridge.step(tick) {
                    Ok(metrics) => snapshot.push((bridge.kind(), metrics)),
                    Err(source) => {
                        failure = Some(RunError::Step {
                            label: bridge.label().to_owned(),
                            tick,
                            source,
                        });
                        break;
                    }
                }
            }
            if failure.is_some() {
                break;
            }

            self.live.record_tick(&snapshot);
            if let Some(record) = snapshot_record(tick, &snapshot) {
                self.outbound.publish(record);
            }

            tick = tick.saturating_add(1);
            self.control.record_tick(tick);

            if self.plan.progress_log_interval > 0
                && tick.checked_rem(self.plan.progress_log_interval) == Some(0)
            {
                self.log_progress(run_id, tick);
            }
        }

        let elapsed = started.elapsed();
        for bridge in &mut bridges {
            bridge.close();
        }

        report.total_ticks = tick;
        report.adaptive = self.live.summary(ControllerKind::Adaptive, elapsed);
        report.fixed = self.live.summary(ControllerKind::Fixed, elapsed);
        report.comparison = self.live.comparison_at(elapsed);
        report.controllers = bridges.iter().flat_map(SessionBridge::reports).collect();

        if let Some(err) = failure {
            error!(run_id = %run_id, tick, error = %err, "Run aborted");
            end_reason = EndReason::Failed;
            report.error = Some(err.to_string());
        }
        report.end_reason = Some(end_reason);

        info!(
            run_id = %run_id,
            ticks = tick,
            reason = ?end_reason,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Run finished"
        );
        report
    }

    /// Prepare demand, launch every session, and bind controllers.
    ///
    /// On failure, every session started so far is closed.
    fn start_sessions(&mut self, strategy: Strategy) -> Result<Vec<SessionBridge>, RunError> {
        if strategy.controllers().contains(&ControllerKind::Adaptive) && self.policy.is_none() {
            return Err(RunError::MissingPolicy);
        }
        let route_file = self.demand.prepare(self.demand_seed)?;

        let mut bridges: Vec<SessionBridge> = Vec::with_capacity(2);
        for &kind in strategy.controllers() {
            let spec = SessionSpec {
                label: kind.label().to_owned(),
                route_file: route_file.clone(),
                seed: self.engine_seed,
            };
            let bound = self
                .launcher
                .launch(&spec)
                .map_err(|source| RunError::Launch {
                    label: spec.label.clone(),
                    source,
                })
                .and_then(|session| {
                    SessionBridge::open(kind, session, &self.plan, self.policy.as_ref())
                        .map_err(RunError::from)
                });
            match bound {
                Ok(bridge) => bridges.push(bridge),
                Err(err) => {
                    for bridge in &mut bridges {
                        bridge.close();
                    }
                    return Err(err);
                }
            }
        }
        Ok(bridges)
    }

    fn log_progress(&self, run_id: RunId, tick: u64) {
        let adaptive = self.live.running(ControllerKind::Adaptive);
        let fixed = self.live.running(ControllerKind::Fixed);
        info!(
            run_id = %run_id,
            tick,
            max_ticks = self.plan.max_ticks,
            adaptive_avg_wait = adaptive.mean_waiting_time(),
            fixed_avg_wait = fixed.mean_waiting_time(),
            adaptive_throughput = adaptive.total_throughput(),
            fixed_throughput = fixed.total_throughput(),
            dropped = self.outbound.dropped(),
            "Run progress"
        );
    }
}

/// Outbound record for one completed tick.
fn snapshot_record(tick: u64, snapshot: &[(ControllerKind, TickMetrics)]) -> Option<MetricsRecord> {
    match snapshot {
        [(ControllerKind::Adaptive, adaptive), (ControllerKind::Fixed, fixed)] => {
            Some(MetricsRecord::Both {
                tick,
                adaptive: *adaptive,
                fixed: *fixed,
            })
        }
        [(kind, metrics)] => Some(MetricsRecord::single(*kind, tick, *metrics)),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::synthetic::{SyntheticLauncher, SyntheticNetwork};

    /// The synthetic engine ignores the route file.
    struct NoRoutes;

    impl DemandSource for NoRoutes {
        fn prepare(&mut self, _seed: u64) -> Result<PathBuf, DemandError> {
            Ok(PathBuf::from("unused.rou.xml"))
        }
    }

    fn orchestrator(max_ticks: u64) -> DualOrchestrator {
        let plan = RunPlan::default().with_max_ticks(max_ticks);
        let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.1);
        DualOrchestrator::new(plan, Box::new(launcher), Box::new(NoRoutes))
    }

    #[test]
    fn fixed_only_run_publishes_single_records() {
        let mut orch = orchestrator(20);
        let outbound = orch.outbound();
        let report = orch.run(Strategy::Fixed);
        assert_eq!(report.end_reason, Some(EndReason::MaxTicksReached));
        assert_eq!(report.total_ticks, 20);
        assert!(report.adaptive.is_none());
        assert!(report.comparison.is_none());
        assert_eq!(report.fixed.unwrap().ticks, 20);

        let records = outbound.drain(100);
        assert_eq!(records.len(), 20);
        assert!(matches!(records.first().unwrap(), MetricsRecord::Fixed { tick: 0, .. }));
    }

    #[test]
    fn adaptive_without_policy_fails_cleanly() {
        let mut orch = orchestrator(10);
        let report = orch.run(Strategy::Both);
        assert_eq!(report.end_reason, Some(EndReason::Failed));
        assert!(report.is_empty());
        assert!(report.error.unwrap().contains("policy"));
        assert!(!orch.control().is_running());
    }

    #[test]
    fn claimed_run_keeps_an_early_stop() {
        let mut orch = orchestrator(50);
        let control = orch.control();
        assert!(control.begin());
        control.request_stop();

        let report = orch.run_claimed(RunId::new(), Strategy::Fixed);
        assert_eq!(report.end_reason, Some(EndReason::OperatorStop));
        assert_eq!(report.total_ticks, 0);
        assert!(!control.is_running());
    }

    #[test]
    fn snapshot_record_shapes() {
        let m = TickMetrics::default();
        assert!(matches!(
            snapshot_record(1, &[(ControllerKind::Adaptive, m), (ControllerKind::Fixed, m)]),
            Some(MetricsRecord::Both { tick: 1, .. })
        ));
        assert!(matches!(
            snapshot_record(2, &[(ControllerKind::Adaptive, m)]),
            Some(MetricsRecord::Adaptive { tick: 2, .. })
        ));
        assert!(snapshot_record(3, &[]).is_none());
    }

    #[test]
    fn plan_durations_per_controller() {
        let plan = RunPlan::default();
        assert_eq!(plan.green_duration(ControllerKind::Adaptive), 10);
        assert_eq!(plan.green_duration(ControllerKind::Fixed), 30);
        assert_eq!(plan.clearance_duration, 4);
    }
}
