//! Phase command behavior observed at the engine boundary.
//!
//! These tests drive full sessions through the orchestrator and inspect
//! the command log the synthetic engine keeps, so they check what the
//! engine actually receives rather than controller internals.

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use signal_core::demand::{DemandError, DemandSource};
use signal_core::orchestrator::{DualOrchestrator, RunPlan};
use signal_core::policy::{Policy, PolicyError};
use signal_core::synthetic::{PhaseCommand, SyntheticLauncher, SyntheticNetwork};
use signal_types::{EndReason, Strategy};

/// Plays back a fixed list of chosen actions, repeating the last one.
struct ScriptedPolicy {
    script: Vec<usize>,
    calls: AtomicUsize,
}

impl ScriptedPolicy {
    fn new(script: Vec<usize>) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }
}

impl Policy for ScriptedPolicy {
    fn input_len(&self) -> usize {
        80
    }

    fn output_len(&self) -> usize {
        4
    }

    fn scores(&self, _features: &[f32]) -> Result<Vec<f32>, PolicyError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let pick = self
            .script
            .get(call)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or(0);
        Ok((0..4).map(|i| if i == pick { 1.0 } else { 0.0 }).collect())
    }
}

struct NoRoutes;

impl DemandSource for NoRoutes {
    fn prepare(&mut self, _seed: u64) -> Result<PathBuf, DemandError> {
        Ok(PathBuf::from("unused.rou.xml"))
    }
}

fn run_adaptive(phase_count: usize, script: Vec<usize>, ticks: u64) -> Vec<PhaseCommand> {
    let launcher = SyntheticLauncher::new(SyntheticNetwork::single(phase_count), 0.1);
    let registry = launcher.registry();
    let mut orch = DualOrchestrator::new(
        RunPlan::default().with_max_ticks(ticks),
        Box::new(launcher),
        Box::new(NoRoutes),
    )
    .with_policy(ScriptedPolicy::new(script));

    let report = orch.run(Strategy::Adaptive);
    assert_eq!(report.end_reason, Some(EndReason::MaxTicksReached));
    registry.get("adaptive").unwrap().commands()
}

#[test]
fn short_program_wraps_clearance_code() {
    // Hold NS (0), switch to EW (2), then leave EW. Leaving EW commands its
    // clearance code 5, which wraps to 5 mod 4 = 1 on a 4-phase program.
    let commands = run_adaptive(4, vec![2, 0], 40);
    let codes: Vec<usize> = commands.iter().map(|c| c.code).collect();

    // init green 0; clear 1; EW green 4 mod 4 = 0; clear 5 mod 4 = 1; NS green 0
    assert_eq!(codes, vec![0, 1, 0, 1, 0]);
    assert!(codes.iter().all(|&code| code < 4));

    let leave_ew = commands.get(3).unwrap();
    assert_eq!(leave_ew.code, 1);
    // Second decision: adaptive interval is 10 + 4 ticks after the first.
    assert_eq!(leave_ew.tick, 28);
}

#[test]
fn full_program_uses_canonical_codes() {
    let commands = run_adaptive(8, vec![2, 0], 40);
    let codes: Vec<usize> = commands.iter().map(|c| c.code).collect();
    assert_eq!(codes, vec![0, 1, 4, 5, 0]);
}

#[test]
fn green_only_after_full_clearance() {
    let commands = run_adaptive(8, vec![1, 2, 3, 0, 3, 3, 1], 200);
    let mut pending_clearance: Option<u64> = None;
    for command in commands.iter().skip(1) {
        if command.code % 2 == 1 {
            assert!(pending_clearance.is_none(), "two clearances in a row");
            pending_clearance = Some(command.tick);
        } else {
            let started = pending_clearance.take().unwrap();
            assert_eq!(command.tick - started, 4);
        }
    }
}

#[test]
fn holding_same_action_issues_no_commands() {
    let commands = run_adaptive(8, vec![0], 100);
    assert_eq!(commands.len(), 1);
}
