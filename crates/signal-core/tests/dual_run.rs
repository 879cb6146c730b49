//! End-to-end runs of the orchestrator against the synthetic engine.
//!
//! Covers the dual run over identical seeded demand, stop handling (both
//! in-loop and through the background control surface), and the failure
//! paths that must still close every session and return a report.

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use signal_core::config::DemandConfig;
use signal_core::control::{ControlSurface, StartAck};
use signal_core::demand::RouteFileGenerator;
use signal_core::operator::RunControl;
use signal_core::orchestrator::{DualOrchestrator, RunPlan};
use signal_core::policy::{Policy, PolicyError};
use signal_core::synthetic::{
    FailurePlan, StopTrigger, SyntheticLauncher, SyntheticNetwork,
};
use signal_types::{ControllerKind, EndReason, LaneId, MetricsRecord, Strategy};

/// Scores action `calls % 4` highest on every call.
struct RotatingPolicy {
    calls: AtomicUsize,
}

impl RotatingPolicy {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl Policy for RotatingPolicy {
    fn input_len(&self) -> usize {
        80
    }

    fn output_len(&self) -> usize {
        4
    }

    fn scores(&self, _features: &[f32]) -> Result<Vec<f32>, PolicyError> {
        let pick = self.calls.fetch_add(1, Ordering::Relaxed) % 4;
        Ok((0..4).map(|i| if i == pick { 1.0 } else { 0.0 }).collect())
    }
}

/// Returns the wrong number of scores.
struct ShortPolicy;

impl Policy for ShortPolicy {
    fn input_len(&self) -> usize {
        80
    }

    fn output_len(&self) -> usize {
        2
    }

    fn scores(&self, _features: &[f32]) -> Result<Vec<f32>, PolicyError> {
        Ok(vec![0.5, 0.5])
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn route_file(name: &str) -> RouteFileGenerator {
    let config = DemandConfig {
        vehicles: 100,
        route_file: std::env::temp_dir().join(format!(
            "signal-core-{name}-{}.rou.xml",
            std::process::id()
        )),
        ..DemandConfig::default()
    };
    RouteFileGenerator::new(&config, 200)
}

fn orchestrator(name: &str, launcher: SyntheticLauncher, max_ticks: u64) -> DualOrchestrator {
    DualOrchestrator::new(
        RunPlan::default().with_max_ticks(max_ticks),
        Box::new(launcher),
        Box::new(route_file(name)),
    )
    .with_policy(RotatingPolicy::new())
}

#[test]
fn fifty_tick_dual_run() {
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.15);
    let registry = launcher.registry();
    let mut orch = orchestrator("fifty", launcher, 50);
    let outbound = orch.outbound();

    let report = orch.run(Strategy::Both);

    assert_eq!(report.end_reason, Some(EndReason::MaxTicksReached));
    assert!(report.error.is_none());
    assert_eq!(report.total_ticks, 50);

    let metrics = orch.last_metrics();
    assert_eq!(metrics.sequence(ControllerKind::Adaptive).len(), 50);
    assert_eq!(metrics.sequence(ControllerKind::Fixed).len(), 50);

    let comparison = report.comparison.unwrap();
    assert_eq!(comparison.adaptive.ticks, 50);
    assert_eq!(comparison.fixed.ticks, 50);
    assert!(comparison.improvement.waiting_time_reduction.is_finite());
    assert_eq!(comparison.time_series.adaptive_waiting.len(), 5);

    assert_eq!(report.controllers.len(), 2);
    assert!(registry.get("adaptive").unwrap().is_closed());
    assert!(registry.get("fixed").unwrap().is_closed());

    let records = outbound.drain(100);
    assert_eq!(records.len(), 50);
    assert!(
        records
            .iter()
            .all(|record| matches!(record, MetricsRecord::Both { .. }))
    );
}

#[test]
fn all_zero_sequences_compare_without_division_by_zero() {
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.0);
    let mut orch = orchestrator("zeros", launcher, 50);

    let report = orch.run(Strategy::Both);

    let comparison = report.comparison.unwrap();
    assert!(approx(comparison.fixed.avg_waiting_time, 0.0));
    assert!(approx(comparison.improvement.waiting_time_reduction, 0.0));
    assert!(approx(comparison.improvement.queue_length_reduction, 0.0));
    assert!(approx(comparison.improvement.throughput_increase, 0.0));
}

#[test]
fn stop_ends_run_at_tick_boundary() {
    let control = Arc::new(RunControl::new());
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.1).with_stop_trigger(
        "adaptive",
        StopTrigger {
            after: 10,
            control: Arc::clone(&control),
        },
    );
    let registry = launcher.registry();
    let mut orch = orchestrator("stop", launcher, 1_000).with_control(control);

    let report = orch.run(Strategy::Both);

    assert_eq!(report.end_reason, Some(EndReason::OperatorStop));
    assert_eq!(report.total_ticks, 10);
    let metrics = orch.last_metrics();
    assert_eq!(metrics.sequence(ControllerKind::Adaptive).len(), 10);
    assert_eq!(metrics.sequence(ControllerKind::Fixed).len(), 10);
    assert!(registry.get("adaptive").unwrap().is_closed());
    assert!(registry.get("fixed").unwrap().is_closed());
}

#[test]
fn control_surface_stop_closes_sessions() {
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.1)
        .with_advance_delay(Duration::from_millis(2));
    let registry = launcher.registry();
    let surface = ControlSurface::new(orchestrator("surface", launcher, 100_000));

    assert!(matches!(surface.start(Strategy::Both), StartAck::Started { .. }));
    assert_eq!(surface.start(Strategy::Both), StartAck::AlreadyRunning);

    for _ in 0..500 {
        if surface.current_tick() >= 5 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(surface.stop());

    let report = surface.wait().unwrap();
    assert_eq!(report.end_reason, Some(EndReason::OperatorStop));
    assert!(report.total_ticks >= 5);
    assert!(report.total_ticks < 100_000);
    assert!(registry.get("adaptive").unwrap().is_closed());
    assert!(registry.get("fixed").unwrap().is_closed());
    assert!(!surface.is_running());
    assert!(surface.summary().is_some());
}

#[test]
fn step_failure_returns_partial_report() {
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.1).with_failures(
        "fixed",
        FailurePlan {
            fail_advance_at: Some(5),
            ..FailurePlan::default()
        },
    );
    let registry = launcher.registry();
    let mut orch = orchestrator("step-failure", launcher, 50);

    let report = orch.run(Strategy::Both);

    assert_eq!(report.end_reason, Some(EndReason::Failed));
    assert!(report.error.unwrap().contains("fixed"));
    assert_eq!(report.total_ticks, 5);
    assert_eq!(report.adaptive.unwrap().ticks, 5);
    assert_eq!(report.fixed.unwrap().ticks, 5);
    assert!(registry.get("adaptive").unwrap().is_closed());
    assert!(registry.get("fixed").unwrap().is_closed());
    assert!(!orch.control().is_running());
}

#[test]
fn launch_failure_closes_started_sessions() {
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.1).failing_launch("fixed");
    let registry = launcher.registry();
    let mut orch = orchestrator("launch-failure", launcher, 50);

    let report = orch.run(Strategy::Both);

    assert_eq!(report.end_reason, Some(EndReason::Failed));
    assert!(report.is_empty());
    assert_eq!(report.total_ticks, 0);
    assert!(registry.get("adaptive").unwrap().is_closed());
    assert!(registry.get("fixed").is_none());
}

#[test]
fn degraded_lane_does_not_abort() {
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.2).with_failures(
        "adaptive",
        FailurePlan {
            fail_lanes: vec![LaneId::from("TL_W2TL_0")],
            ..FailurePlan::default()
        },
    );
    let mut orch = orchestrator("degraded", launcher, 60);

    let report = orch.run(Strategy::Both);

    assert_eq!(report.end_reason, Some(EndReason::MaxTicksReached));
    assert_eq!(report.total_ticks, 60);
}

#[test]
fn malformed_policy_output_falls_back() {
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.1);
    let mut orch = DualOrchestrator::new(
        RunPlan::default().with_max_ticks(30),
        Box::new(launcher),
        Box::new(route_file("fallback")),
    )
    .with_policy(Arc::new(ShortPolicy));

    let report = orch.run(Strategy::Adaptive);

    assert_eq!(report.end_reason, Some(EndReason::MaxTicksReached));
    let adaptive = report.controllers.first().unwrap();
    assert_eq!(adaptive.controller, ControllerKind::Adaptive);
    assert!(!adaptive.decisions.is_empty());
    assert!(adaptive.decisions.iter().all(|d| d.fallback));
    // Round-robin from action 0.
    assert_eq!(adaptive.decisions.first().unwrap().action, 1);
}

#[test]
fn route_file_written_once_per_run() {
    let generator = route_file("routes");
    let path: PathBuf = generator.path().to_path_buf();
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.1);
    let mut orch = DualOrchestrator::new(
        RunPlan::default().with_max_ticks(5),
        Box::new(launcher),
        Box::new(generator),
    )
    .with_policy(RotatingPolicy::new());

    let report = orch.run(Strategy::Both);

    assert!(report.error.is_none());
    let xml = std::fs::read_to_string(&path).unwrap();
    assert_eq!(xml.matches("<vehicle ").count(), 100);
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn subscribers_receive_streamed_records() {
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(8), 0.1);
    let mut orch = orchestrator("stream", launcher, 20);
    let mut rx = orch.outbound().subscribe();

    let report = tokio::task::spawn_blocking(move || orch.run(Strategy::Fixed))
        .await
        .unwrap();
    assert_eq!(report.total_ticks, 20);

    let first = rx.recv().await.unwrap();
    assert_eq!(first.tick(), 0);
    assert!(matches!(first, MetricsRecord::Fixed { .. }));
}
