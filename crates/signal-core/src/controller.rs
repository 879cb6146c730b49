//! Per-intersection phase controller.
//!
//! Each controller is a two-state machine:
//!
//! - `Holding(action)`: the action's green code is active. Once
//!   `green_duration + clearance_duration` ticks have passed since the last
//!   decision, the decision source is consulted. Choosing a different
//!   action commands the clearance code of the *current* action and moves
//!   to `Clearing`. Either way the decision is logged and the counter
//!   resets to zero.
//! - `Clearing(from, to)`: after exactly `clearance_duration` ticks the
//!   green code of `to` is commanded and the controller holds `to`.
//!
//! The controller is the only writer of phase commands for its
//! intersection. Decision sources only return an action index.

use signal_types::{ControllerKind, ControllerReport, Decision, IntersectionId, LaneId};
use tracing::{debug, warn};

use crate::bridge::EngineLink;
use crate::decision::{DecisionSource, RoundRobinSource};
use crate::encoder::{LaneObservation, StateEncoder, StateVector, observe};
use crate::phase::PhaseTable;

/// Timing parameters, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTiming {
    /// Minimum green hold after a clearance completes.
    pub green_duration: u64,
    /// Length of every clearance phase.
    pub clearance_duration: u64,
}

impl ControllerTiming {
    /// Ticks between two decisions.
    pub const fn decision_interval(&self) -> u64 {
        self.green_duration.saturating_add(self.clearance_duration)
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    /// Green for the action is active.
    Holding {
        /// Action being served.
        action: usize,
    },
    /// Clearance between two actions is active.
    Clearing {
        /// Action being left.
        from: usize,
        /// Action that gets green once clearance ends.
        to: usize,
    },
}

impl SignalState {
    /// Action whose green is active or was last active.
    pub const fn current_action(&self) -> usize {
        match *self {
            Self::Holding { action } => action,
            Self::Clearing { from, .. } => from,
        }
    }
}

/// What one controller observed and did during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerOutput {
    /// Intersection the output belongs to.
    pub intersection: IntersectionId,
    /// Current action (the one being left while clearing).
    pub current_action: usize,
    /// Whether a clearance phase is active.
    pub clearing: bool,
    /// Average accumulated waiting time over waiting vehicles.
    pub waiting_time: f64,
    /// Halted vehicles on controlled lanes.
    pub queue_length: u32,
    /// Ticks since the last decision.
    pub ticks_since_decision: u64,
    /// Occupancy state vector for this tick.
    pub state: StateVector,
}

/// State machine for one intersection.
pub struct PhaseController {
    intersection: IntersectionId,
    kind: ControllerKind,
    table: PhaseTable,
    timing: ControllerTiming,
    encoder: StateEncoder,
    source: Box<dyn DecisionSource>,
    fallback: RoundRobinSource,
    state: SignalState,
    ticks_since_decision: u64,
    initialized: bool,
    lanes: Option<Vec<LaneId>>,
    decisions: Vec<Decision>,
    phase_changes: u64,
    steps: u64,
    waiting_sum: f64,
    queue_sum: u64,
}

impl std::fmt::Debug for PhaseController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseController")
            .field("intersection", &self.intersection)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("ticks_since_decision", &self.ticks_since_decision)
            .finish_non_exhaustive()
    }
}

impl PhaseController {
    /// Create a controller holding the first action.
    pub fn new(
        intersection: IntersectionId,
        kind: ControllerKind,
        table: PhaseTable,
        timing: ControllerTiming,
        encoder: StateEncoder,
        source: Box<dyn DecisionSource>,
    ) -> Self {
        let fallback = RoundRobinSource::new(table.num_actions());
        Self {
            intersection,
            kind,
            table,
            timing,
            encoder,
            source,
            fallback,
            state: SignalState::Holding { action: 0 },
            ticks_since_decision: 0,
            initialized: false,
            lanes: None,
            decisions: Vec::new(),
            phase_changes: 0,
            steps: 0,
            waiting_sum: 0.0,
            queue_sum: 0,
        }
    }

    /// Intersection this controller drives.
    pub const fn intersection(&self) -> &IntersectionId {
        &self.intersection
    }

    /// Current state.
    pub const fn state(&self) -> SignalState {
        self.state
    }

    /// Ticks since the last decision.
    pub const fn ticks_since_decision(&self) -> u64 {
        self.ticks_since_decision
    }

    /// Decisions taken so far.
    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Run one tick: observe, encode, and advance the state machine.
    pub fn step(&mut self, tick: u64, link: &mut EngineLink) -> ControllerOutput {
        if !self.initialized {
            self.initialized = true;
            self.command_green(link, self.state.current_action());
        }

        self.ticks_since_decision = self.ticks_since_decision.saturating_add(1);

        let lanes = self.lanes(link);
        let observations = observe(link, &lanes);
        let state = self.encoder.encode(&observations);
        let (waiting_total, waiting_avg) = waiting_time(&observations);
        let queue_length = observations
            .iter()
            .fold(0_u32, |acc, obs| acc.saturating_add(obs.halted));

        match self.state {
            SignalState::Clearing { to, .. }
                if self.ticks_since_decision >= self.timing.clearance_duration =>
            {
                self.command_green(link, to);
                self.state = SignalState::Holding { action: to };
            }
            SignalState::Holding { action }
                if self.ticks_since_decision >= self.timing.decision_interval() =>
            {
                self.decide(tick, link, action, &state, waiting_total, queue_length);
            }
            SignalState::Holding { .. } | SignalState::Clearing { .. } => {}
        }

        self.steps = self.steps.saturating_add(1);
        self.waiting_sum += waiting_avg;
        self.queue_sum = self.queue_sum.saturating_add(u64::from(queue_length));

        ControllerOutput {
            intersection: self.intersection.clone(),
            current_action: self.state.current_action(),
            clearing: matches!(self.state, SignalState::Clearing { .. }),
            waiting_time: waiting_avg,
            queue_length,
            ticks_since_decision: self.ticks_since_decision,
            state,
        }
    }

    fn decide(
        &mut self,
        tick: u64,
        link: &mut EngineLink,
        current: usize,
        state: &StateVector,
        waiting_total: f64,
        queue_length: u32,
    ) {
        let (next, fallback) = match self.source.choose(state, current) {
            Ok(next) if next < self.table.num_actions() => (next, false),
            Ok(next) => {
                warn!(intersection = %self.intersection, action = next,
                    "Decision out of range, using fixed-time fallback");
                (self.fallback.next_after(current), true)
            }
            Err(err) => {
                warn!(intersection = %self.intersection, error = %err,
                    "Decision failed, using fixed-time fallback");
                (self.fallback.next_after(current), true)
            }
        };

        if next != current {
            if let Some(pair) = self.table.pair(current) {
                self.command(link, pair.clearance);
            }
            self.state = SignalState::Clearing {
                from: current,
                to: next,
            };
            self.phase_changes = self.phase_changes.saturating_add(1);
        }

        debug!(
            intersection = %self.intersection,
            controller = %self.kind,
            tick,
            from = current,
            to = next,
            fallback,
            "Phase decision"
        );

        self.decisions.push(Decision {
            tick,
            state: state.as_slice().to_vec(),
            action: next,
            waiting_time: waiting_total,
            queue_length,
            fallback,
        });
        self.ticks_since_decision = 0;
    }

    fn command_green(&self, link: &mut EngineLink, action: usize) {
        if let Some(pair) = self.table.pair(action) {
            self.command(link, pair.green);
        }
    }

    fn command(&self, link: &mut EngineLink, code: usize) {
        if let Some(err) = link.set_phase(&self.intersection, code).degraded() {
            debug!(intersection = %self.intersection, code, error = %err, "Phase command ignored");
        }
    }

    fn lanes(&mut self, link: &mut EngineLink) -> Vec<LaneId> {
        if let Some(lanes) = &self.lanes {
            return lanes.clone();
        }
        match link.controlled_lanes(&self.intersection).value() {
            Some(lanes) => {
                self.lanes = Some(lanes.clone());
                lanes
            }
            None => Vec::new(),
        }
    }

    /// Statistics collected so far.
    pub fn report(&self) -> ControllerReport {
        let (avg_waiting_time, avg_queue_length) = if self.steps == 0 {
            (0.0, 0.0)
        } else {
            let steps = crate::metrics::count_as_f64(self.steps);
            (
                self.waiting_sum / steps,
                crate::metrics::count_as_f64(self.queue_sum) / steps,
            )
        };
        ControllerReport {
            intersection: self.intersection.clone(),
            controller: self.kind,
            phase_changes: self.phase_changes,
            avg_waiting_time,
            avg_queue_length,
            decisions: self.decisions.clone(),
        }
    }
}

/// Total and average waiting time over vehicles that have waited at all.
fn waiting_time(observations: &[LaneObservation]) -> (f64, f64) {
    let mut total = 0.0;
    let mut waiting: u64 = 0;
    for vehicle in observations.iter().flat_map(|obs| &obs.vehicles) {
        if vehicle.waiting_time > 0.0 {
            total += vehicle.waiting_time;
            waiting = waiting.saturating_add(1);
        }
    }
    if waiting == 0 {
        (total, 0.0)
    } else {
        (total, total / crate::metrics::count_as_f64(waiting))
    }
}
