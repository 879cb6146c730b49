//! Best-effort access to one engine session.
//!
//! The control loop tolerates partial observation failures: a lane that
//! cannot be read this tick simply contributes nothing. [`EngineLink`]
//! wraps an [`EngineSession`] and returns [`Probe`] values for every
//! observation, so callers decide explicitly between "value" and
//! "degraded" instead of silently swallowing errors.
//!
//! Session-level failures (advancing the engine, discovering
//! intersections) are still returned as errors and abort the run.
//!
//! [`SessionBridge`] binds one link to the phase controllers of every
//! intersection in the session and produces per-tick metrics.

use std::collections::BTreeMap;
use std::sync::Arc;

use signal_types::{
    ControllerKind, ControllerReport, IntersectionId, LaneGroup, LaneId, TickMetrics, VehicleId,
};
use tracing::{debug, info, warn};

use crate::controller::{ControllerTiming, PhaseController};
use crate::decision::{DecisionSource, PolicySource, RoundRobinSource};
use crate::encoder::{StateEncoder, classify_lane};
use crate::engine::{EngineError, EngineSession};
use crate::orchestrator::RunPlan;
use crate::phase::{PhaseTable, PhaseTableError};
use crate::policy::Policy;

/// Phase count assumed when the engine cannot report one.
pub const DEFAULT_PHASE_COUNT: usize = 8;

/// Outcome of a best-effort engine query.
#[derive(Debug)]
pub enum Probe<T> {
    /// The query succeeded.
    Value(T),
    /// The query failed; the error is kept for diagnostics.
    Degraded(EngineError),
}

impl<T> Probe<T> {
    /// Wrap a query result.
    pub fn from_result(result: Result<T, EngineError>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(err) => Self::Degraded(err),
        }
    }

    /// The value, if the query succeeded.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Degraded(_) => None,
        }
    }

    /// The value, or `fallback` if the query failed.
    pub fn value_or(self, fallback: T) -> T {
        self.value().unwrap_or(fallback)
    }

    /// The error, if the query failed.
    pub fn degraded(self) -> Option<EngineError> {
        match self {
            Self::Value(_) => None,
            Self::Degraded(err) => Some(err),
        }
    }

    /// Whether the query failed.
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

impl<T: Default> Probe<T> {
    /// The value, or `T::default()` if the query failed.
    pub fn value_or_default(self) -> T {
        self.value().unwrap_or_default()
    }
}

/// Best-effort wrapper around one engine session.
pub struct EngineLink {
    session: Box<dyn EngineSession>,
    /// Successful lane classifications. Geometry does not change during a
    /// run, so each lane is classified at most once.
    lane_groups: BTreeMap<LaneId, LaneGroup>,
}

impl std::fmt::Debug for EngineLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLink")
            .field("label", &self.session.label())
            .field("classified_lanes", &self.lane_groups.len())
            .finish_non_exhaustive()
    }
}

impl EngineLink {
    /// Wrap a session.
    pub fn new(session: Box<dyn EngineSession>) -> Self {
        Self {
            session,
            lane_groups: BTreeMap::new(),
        }
    }

    /// Session label.
    pub fn label(&self) -> &str {
        self.session.label()
    }

    /// Step the engine by one tick.
    ///
    /// # Errors
    ///
    /// Propagates the session error; a failed step aborts the run.
    pub fn advance(&mut self) -> Result<(), EngineError> {
        self.session.advance()
    }

    /// All signalized intersections.
    ///
    /// # Errors
    ///
    /// Propagates the session error.
    pub fn intersection_ids(&mut self) -> Result<Vec<IntersectionId>, EngineError> {
        self.session.intersection_ids()
    }

    /// Phase count of the intersection's signal program.
    pub fn phase_count(&mut self, intersection: &IntersectionId) -> Probe<usize> {
        Probe::from_result(self.session.phase_count(intersection))
    }

    /// Controlled lanes, deduplicated and in stable order.
    pub fn controlled_lanes(&mut self, intersection: &IntersectionId) -> Probe<Vec<LaneId>> {
        Probe::from_result(self.session.controlled_lanes(intersection).map(|mut lanes| {
            lanes.sort();
            lanes.dedup();
            lanes
        }))
    }

    /// Vehicles on the lane.
    pub fn lane_vehicles(&mut self, lane: &LaneId) -> Probe<Vec<VehicleId>> {
        Probe::from_result(self.session.lane_vehicles(lane))
    }

    /// Vehicle distance to the stop line: lane length minus lane position.
    pub fn vehicle_distance(&mut self, lane: &LaneId, vehicle: &VehicleId) -> Probe<f64> {
        let length = match self.session.lane_length(lane) {
            Ok(length) => length,
            Err(err) => return Probe::Degraded(err),
        };
        Probe::from_result(
            self.session
                .vehicle_lane_position(vehicle)
                .map(|position| length - position),
        )
    }

    /// Vehicle accumulated waiting time.
    pub fn vehicle_waiting_time(&mut self, vehicle: &VehicleId) -> Probe<f64> {
        Probe::from_result(self.session.vehicle_waiting_time(vehicle))
    }

    /// Halted vehicles on the lane.
    pub fn halted_count(&mut self, lane: &LaneId) -> Probe<u32> {
        Probe::from_result(self.session.halted_count(lane))
    }

    /// Vehicles that arrived during the last tick.
    pub fn arrived_count(&mut self) -> Probe<u32> {
        Probe::from_result(self.session.arrived_count())
    }

    /// Command a phase code.
    pub fn set_phase(&mut self, intersection: &IntersectionId, code: usize) -> Probe<()> {
        Probe::from_result(self.session.set_phase(intersection, code))
    }

    /// Lane group of a controlled lane, classifying it on first use.
    ///
    /// Returns `None` if the geometry or edge queries fail or the lane
    /// cannot be classified; failures are retried on the next call.
    pub fn lane_group(&mut self, lane: &LaneId) -> Option<LaneGroup> {
        if let Some(group) = self.lane_groups.get(lane) {
            return Some(*group);
        }
        let group = self.classify(lane)?;
        self.lane_groups.insert(lane.clone(), group);
        Some(group)
    }

    fn classify(&mut self, lane: &LaneId) -> Option<LaneGroup> {
        let shape = match self.session.lane_shape(lane) {
            Ok(shape) => shape,
            Err(err) => {
                debug!(lane = %lane, error = %err, "Lane geometry unavailable");
                return None;
            }
        };
        let edge = self.session.lane_edge(lane).ok()?;
        let edge_lanes = self.session.edge_lane_count(&edge).ok()?;
        classify_lane(&shape, lane.index(), edge_lanes)
    }

    /// Close the underlying session.
    ///
    /// # Errors
    ///
    /// Propagates the session error.
    pub fn close(&mut self) -> Result<(), EngineError> {
        self.session.close()
    }
}

/// Errors raised while binding controllers to a session.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Intersection discovery failed.
    #[error("session '{label}' failed during setup: {source}")]
    Engine {
        /// Session label.
        label: String,
        /// The underlying engine error.
        source: EngineError,
    },

    /// The phase table could not be built.
    #[error("intersection {intersection}: {source}")]
    Phase {
        /// Intersection being bound.
        intersection: IntersectionId,
        /// The underlying phase table error.
        #[source]
        source: PhaseTableError,
    },

    /// An adaptive session was requested without a policy.
    #[error("adaptive control requires a policy")]
    MissingPolicy,
}

/// One session plus the phase controllers bound to its intersections.
#[derive(Debug)]
pub struct SessionBridge {
    kind: ControllerKind,
    link: EngineLink,
    controllers: Vec<PhaseController>,
}

impl SessionBridge {
    /// Discover intersections and bind a controller of `kind` to each.
    ///
    /// The session is closed before an error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] if discovery fails, a phase table cannot be
    /// built, or an adaptive session has no policy.
    pub fn open(
        kind: ControllerKind,
        session: Box<dyn EngineSession>,
        plan: &RunPlan,
        policy: Option<&Arc<dyn Policy>>,
    ) -> Result<Self, BridgeError> {
        let mut link = EngineLink::new(session);
        match Self::bind(kind, &mut link, plan, policy) {
            Ok(controllers) => Ok(Self {
                kind,
                link,
                controllers,
            }),
            Err(err) => {
                if let Err(close_err) = link.close() {
                    warn!(session = %link.label(), error = %close_err,
                        "Failed to close session after setup error");
                }
                Err(err)
            }
        }
    }

    fn bind(
        kind: ControllerKind,
        link: &mut EngineLink,
        plan: &RunPlan,
        policy: Option<&Arc<dyn Policy>>,
    ) -> Result<Vec<PhaseController>, BridgeError> {
        let label = link.label().to_owned();
        let intersections = link
            .intersection_ids()
            .map_err(|source| BridgeError::Engine {
                label: label.clone(),
                source,
            })?;

        let timing = ControllerTiming {
            green_duration: plan.green_duration(kind),
            clearance_duration: plan.clearance_duration,
        };
        let encoder = StateEncoder::new(plan.num_states);

        let mut controllers = Vec::with_capacity(intersections.len());
        for intersection in intersections {
            let phase_count = match link.phase_count(&intersection) {
                Probe::Value(count) if count > 0 => count,
                Probe::Value(_) => {
                    warn!(session = %label, intersection = %intersection,
                        assumed = DEFAULT_PHASE_COUNT, "Signal program reports no phases");
                    DEFAULT_PHASE_COUNT
                }
                Probe::Degraded(err) => {
                    warn!(session = %label, intersection = %intersection, error = %err,
                        assumed = DEFAULT_PHASE_COUNT, "Phase count unavailable");
                    DEFAULT_PHASE_COUNT
                }
            };
            let table = PhaseTable::new(plan.num_actions, phase_count).map_err(|source| {
                BridgeError::Phase {
                    intersection: intersection.clone(),
                    source,
                }
            })?;
            debug!(session = %label, intersection = %intersection,
                phases = table.phase_count(), "Phase table resolved");
            let source: Box<dyn DecisionSource> = match kind {
                ControllerKind::Adaptive => {
                    let policy = policy.ok_or(BridgeError::MissingPolicy)?;
                    Box::new(PolicySource::new(Arc::clone(policy), plan.num_actions))
                }
                ControllerKind::Fixed => Box::new(RoundRobinSource::new(plan.num_actions)),
            };
            controllers.push(PhaseController::new(
                intersection,
                kind,
                table,
                timing,
                encoder,
                source,
            ));
        }

        info!(
            session = %label,
            controller = %kind,
            intersections = controllers.len(),
            "Session bridge ready"
        );
        Ok(controllers)
    }

    /// Controller family of this session.
    pub const fn kind(&self) -> ControllerKind {
        self.kind
    }

    /// Session label.
    pub fn label(&self) -> &str {
        self.link.label()
    }

    /// Advance the engine one tick, then step every controller.
    ///
    /// Returns this session's metrics for the tick: waiting time and queue
    /// length summed across intersections, throughput from the engine's
    /// arrived count.
    ///
    /// # Errors
    ///
    /// Returns the engine error if advancing the session fails.
    pub fn step(&mut self, tick: u64) -> Result<TickMetrics, EngineError> {
        self.link.advance()?;
        let throughput = self.link.arrived_count().value_or_default();

        let mut metrics = TickMetrics {
            waiting_time: 0.0,
            queue_length: 0,
            throughput,
        };
        for controller in &mut self.controllers {
            let output = controller.step(tick, &mut self.link);
            metrics.waiting_time += output.waiting_time;
            metrics.queue_length = metrics.queue_length.saturating_add(output.queue_length);
        }
        Ok(metrics)
    }

    /// Per-intersection statistics.
    pub fn reports(&self) -> Vec<ControllerReport> {
        self.controllers.iter().map(PhaseController::report).collect()
    }

    /// Close the session, logging rather than propagating failures.
    pub fn close(&mut self) {
        if let Err(err) = self.link.close() {
            warn!(session = %self.link.label(), error = %err, "Failed to close session cleanly");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::synthetic::{FailurePlan, SyntheticEngine, SyntheticNetwork};

    fn session(plan: FailurePlan) -> Box<dyn EngineSession> {
        Box::new(
            SyntheticEngine::new("probe", SyntheticNetwork::single(8), 0.0, 1).with_failures(plan),
        )
    }

    #[test]
    fn probe_accessors() {
        let ok: Probe<u32> = Probe::Value(3);
        assert!(!ok.is_degraded());
        assert_eq!(ok.value_or(9), 3);

        let bad: Probe<u32> = Probe::Degraded(EngineError::Rejected {
            message: "nope".into(),
        });
        assert!(bad.is_degraded());
        assert_eq!(bad.value_or_default(), 0);
    }

    #[test]
    fn controlled_lanes_deduplicated() {
        let mut link = EngineLink::new(session(FailurePlan::default()));
        let ids = link.intersection_ids().unwrap();
        let lanes = link
            .controlled_lanes(ids.first().unwrap())
            .value()
            .unwrap();
        let mut unique = lanes.clone();
        unique.dedup();
        assert_eq!(lanes, unique);
        assert_eq!(lanes.len(), 8);
    }

    #[test]
    fn failed_lane_degrades_only_that_lane() {
        let failing = LaneId::from("TL_N2TL_0");
        let mut link = EngineLink::new(session(FailurePlan {
            fail_lanes: vec![failing.clone()],
            ..FailurePlan::default()
        }));
        assert!(link.lane_vehicles(&failing).is_degraded());
        assert!(link.lane_group(&failing).is_none());
        assert!(!link.lane_vehicles(&LaneId::from("TL_W2TL_0")).is_degraded());
    }

    #[test]
    fn lane_groups_cover_every_approach() {
        let mut link = EngineLink::new(session(FailurePlan::default()));
        let ids = link.intersection_ids().unwrap();
        let lanes = link
            .controlled_lanes(ids.first().unwrap())
            .value()
            .unwrap();
        let mut indices: Vec<u8> = lanes
            .iter()
            .map(|lane| link.lane_group(lane).unwrap().index())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn missing_phase_count_falls_back() {
        let plan = RunPlan::default();
        let bridge = SessionBridge::open(
            ControllerKind::Fixed,
            session(FailurePlan {
                fail_phase_count: true,
                ..FailurePlan::default()
            }),
            &plan,
            None,
        )
        .unwrap();
        assert_eq!(bridge.reports().len(), 1);
    }

    #[test]
    fn adaptive_without_policy_rejected() {
        let plan = RunPlan::default();
        let result = SessionBridge::open(
            ControllerKind::Adaptive,
            session(FailurePlan::default()),
            &plan,
            None,
        );
        assert!(matches!(result, Err(BridgeError::MissingPolicy)));
    }
}
