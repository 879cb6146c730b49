//! Control surface for starting, stopping, and inspecting runs.
//!
//! [`ControlSurface`] runs the orchestrator on a dedicated control thread
//! so callers (the binary, a status endpoint, tests) are never blocked by
//! the engine. Nothing here returns an error for a failed run: failures
//! show up as a report with `error` set.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use signal_types::{Comparison, MetricsRecord, RunId, RunReport, Strategy};
use tracing::{info, warn};

use crate::metrics::LiveMetrics;
use crate::operator::RunControl;
use crate::orchestrator::DualOrchestrator;
use crate::outbound::OutboundQueue;

/// Outcome of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartAck {
    /// The run was accepted and is executing.
    Started {
        /// Identifier of the new run.
        run_id: RunId,
    },
    /// A run is already executing; nothing was started.
    AlreadyRunning,
    /// The control thread could not be spawned.
    Rejected {
        /// Why the request was rejected.
        reason: String,
    },
}

/// Thread-safe handle for driving runs in the background.
#[derive(Debug)]
pub struct ControlSurface {
    orchestrator: Arc<Mutex<DualOrchestrator>>,
    control: Arc<RunControl>,
    outbound: Arc<OutboundQueue>,
    live: Arc<LiveMetrics>,
    last_report: Arc<Mutex<Option<RunReport>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ControlSurface {
    /// Wrap an orchestrator.
    pub fn new(orchestrator: DualOrchestrator) -> Self {
        let control = orchestrator.control();
        let outbound = orchestrator.outbound();
        let live = orchestrator.live();
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            control,
            outbound,
            live,
            last_report: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    /// Start a run on the control thread.
    ///
    /// The run is claimed before this returns, so a [`stop`](Self::stop)
    /// issued right after a `Started` ack is never lost.
    pub fn start(&self, strategy: Strategy) -> StartAck {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return StartAck::AlreadyRunning;
        }
        if let Some(finished) = worker.take() {
            join_worker(finished);
        }
        if !self.control.begin() {
            return StartAck::AlreadyRunning;
        }
        self.live.reset();
        *self.last_report.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let run_id = RunId::new();
        let orchestrator = Arc::clone(&self.orchestrator);
        let last_report = Arc::clone(&self.last_report);
        let spawned = std::thread::Builder::new()
            .name("signal-control".to_owned())
            .spawn(move || {
                let report = orchestrator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .run_claimed(run_id, strategy);
                *last_report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!(run_id = %run_id, strategy = ?strategy, "Run started");
                StartAck::Started { run_id }
            }
            Err(err) => {
                self.control.finish();
                warn!(error = %err, "Failed to spawn control thread");
                StartAck::Rejected {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Request the current run to stop at the next tick boundary.
    ///
    /// Returns `false` if no run is executing.
    pub fn stop(&self) -> bool {
        let active = self.is_running();
        self.control.request_stop();
        if active {
            info!(tick = self.control.current_tick(), "Stop requested");
        }
        active
    }

    /// Block until the current run (if any) finishes, then return the
    /// latest report.
    pub fn wait(&self) -> Option<RunReport> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            join_worker(handle);
        }
        self.last_report()
    }

    /// Whether a run is executing or about to.
    pub fn is_running(&self) -> bool {
        self.control.is_running()
            || self
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Ticks completed by the current (or last) run.
    pub fn current_tick(&self) -> u64 {
        self.control.current_tick()
    }

    /// Report of the most recently finished run.
    pub fn last_report(&self) -> Option<RunReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adaptive-versus-fixed comparison, if both sessions have data.
    ///
    /// Computed from the live sequences while a run is in progress, taken
    /// from the finished run's report otherwise.
    pub fn summary(&self) -> Option<Comparison> {
        if self.is_running() {
            self.live.comparison()
        } else {
            self.last_report().and_then(|report| report.comparison)
        }
    }

    /// Oldest unread streamed record, without blocking.
    pub fn latest_queued(&self) -> Option<MetricsRecord> {
        self.outbound.try_pop()
    }

    /// Outbound queue shared with the run loop.
    pub fn outbound(&self) -> Arc<OutboundQueue> {
        Arc::clone(&self.outbound)
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("Control thread panicked");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use signal_types::EndReason;

    use super::*;
    use crate::demand::{DemandError, DemandSource};
    use crate::orchestrator::RunPlan;
    use crate::policy::{Policy, PolicyError};
    use crate::synthetic::{SyntheticLauncher, SyntheticNetwork};

    struct NoRoutes;

    impl DemandSource for NoRoutes {
        fn prepare(&mut self, _seed: u64) -> Result<PathBuf, DemandError> {
            Ok(PathBuf::from("unused.rou.xml"))
        }
    }

    /// Always prefers the first action.
    struct FirstAction;

    impl Policy for FirstAction {
        fn input_len(&self) -> usize {
            80
        }
        fn output_len(&self) -> usize {
            4
        }
        fn scores(&self, _features: &[f32]) -> Result<Vec<f32>, PolicyError> {
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
    }

    fn surface(max_ticks: u64, delay: Duration) -> ControlSurface {
        let launcher =
            SyntheticLauncher::new(SyntheticNetwork::single(8), 0.1).with_advance_delay(delay);
        ControlSurface::new(
            DualOrchestrator::new(
                RunPlan::default().with_max_ticks(max_ticks),
                Box::new(launcher),
                Box::new(NoRoutes),
            )
            .with_policy(Arc::new(FirstAction)),
        )
    }

    fn wait_for_tick(surface: &ControlSurface, tick: u64) {
        while surface.current_tick() < tick {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn second_start_while_running_is_refused() {
        let surface = surface(10_000, Duration::from_millis(1));
        assert!(matches!(
            surface.start(Strategy::Fixed),
            StartAck::Started { .. }
        ));
        assert_eq!(surface.start(Strategy::Fixed), StartAck::AlreadyRunning);

        wait_for_tick(&surface, 1);
        assert!(surface.stop());
        let report = surface.wait().unwrap();
        assert_eq!(report.end_reason, Some(EndReason::OperatorStop));
        assert!(report.total_ticks < 10_000);
        assert!(!surface.is_running());
    }

    #[test]
    fn stop_right_after_start_is_honoured() {
        let surface = surface(300, Duration::from_millis(1));
        for _ in 0..20 {
            assert!(matches!(
                surface.start(Strategy::Fixed),
                StartAck::Started { .. }
            ));
            assert!(surface.stop());
            let report = surface.wait().unwrap();
            assert_eq!(report.end_reason, Some(EndReason::OperatorStop));
            assert!(report.total_ticks < 300);
        }
    }

    #[test]
    fn summary_follows_the_run_in_progress() {
        let surface = surface(10_000, Duration::from_millis(1));
        assert!(surface.summary().is_none());

        assert!(matches!(
            surface.start(Strategy::Both),
            StartAck::Started { .. }
        ));
        wait_for_tick(&surface, 5);
        let live = surface.summary().unwrap();
        assert!(live.adaptive.ticks >= 5);
        assert_eq!(live.adaptive.ticks, live.fixed.ticks);
        surface.stop();
        let first = surface.wait().unwrap();
        let finished = surface.summary().unwrap();
        assert_eq!(Some(&finished), first.comparison.as_ref());

        // A fixed-only run has nothing to compare; the first run's
        // comparison must not be reported for it.
        assert!(matches!(
            surface.start(Strategy::Fixed),
            StartAck::Started { .. }
        ));
        assert!(surface.last_report().is_none());
        assert!(surface.summary().is_none());
        wait_for_tick(&surface, 3);
        assert!(surface.summary().is_none());
        surface.stop();
        let second = surface.wait().unwrap();
        assert!(second.comparison.is_none());
        assert!(surface.summary().is_none());
    }

    #[test]
    fn queued_records_are_popped_one_at_a_time() {
        let surface = surface(15, Duration::ZERO);
        assert!(surface.last_report().is_none());
        assert!(matches!(
            surface.start(Strategy::Fixed),
            StartAck::Started { .. }
        ));
        let report = surface.wait().unwrap();
        assert_eq!(report.total_ticks, 15);
        assert_eq!(surface.latest_queued().unwrap().tick(), 0);
        assert_eq!(surface.latest_queued().unwrap().tick(), 1);
        assert_eq!(surface.outbound().drain(usize::MAX).len(), 13);
        assert!(surface.latest_queued().is_none());
        assert!(!surface.stop());
    }
}
