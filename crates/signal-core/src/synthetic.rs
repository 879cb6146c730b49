//! In-process engine double.
//!
//! [`SyntheticEngine`] implements [`EngineSession`] with a deliberately
//! simple traffic model: four-arm intersections, two lanes per approach
//! (through and left), vehicles moving a fixed distance per tick and
//! queueing behind the stop line or the vehicle ahead. It is fast and fully
//! deterministic, which makes it the backend for unit and integration
//! tests and for dry runs without a simulator installed.
//!
//! Arrivals consume exactly one random draw per lane per tick regardless
//! of signal state, so two sessions with the same seed see identical
//! demand even when their controllers behave differently.
//!
//! Test hooks: scripted vehicles ([`SyntheticEngine::place_vehicle`]),
//! failure injection ([`FailurePlan`]), an artificial step delay, a stop
//! trigger, and a shared [`SessionLog`] recording every phase command and
//! whether the session was closed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use signal_types::{Approach, EdgeId, IntersectionId, LaneGroup, LaneId, TurnKind, VehicleId};

use crate::config::SyntheticConfig;
use crate::engine::{EngineError, EngineLauncher, EngineSession, SessionSpec};
use crate::operator::RunControl;

/// Distance a free-flowing vehicle covers per tick, in metres.
pub const SPEED: f64 = 10.0;

/// Minimum spacing between queued vehicles, in metres.
pub const GAP: f64 = 7.5;

/// Length of every synthetic approach lane, in metres.
pub const LANE_LENGTH: f64 = 250.0;

/// Where the front vehicle stops when the signal is red.
const STOP_OFFSET: f64 = 1.0;

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Static description of one controlled lane.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticLane {
    /// Lane identifier (`<edge>_<index>`).
    pub id: LaneId,
    /// Edge the lane belongs to.
    pub edge: EdgeId,
    /// Lane group served.
    pub group: LaneGroup,
    /// Centre line, upstream to stop line.
    pub shape: Vec<(f64, f64)>,
    /// Lane length.
    pub length: f64,
}

/// One four-arm signalized intersection.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticIntersection {
    /// Intersection identifier.
    pub id: IntersectionId,
    /// Number of phases in the signal program.
    pub phase_count: usize,
    /// Controlled lanes.
    pub lanes: Vec<SyntheticLane>,
}

impl SyntheticIntersection {
    /// Four approaches with a through lane (index 0) and a left-turn lane
    /// (index 1) each, all pointing at the origin.
    pub fn four_way(id: &str, phase_count: usize) -> Self {
        let arms = [
            (Approach::West, "W2TL", (-LANE_LENGTH, 0.0)),
            (Approach::North, "N2TL", (0.0, LANE_LENGTH)),
            (Approach::East, "E2TL", (LANE_LENGTH, 0.0)),
            (Approach::South, "S2TL", (0.0, -LANE_LENGTH)),
        ];
        let mut lanes = Vec::with_capacity(arms.len().saturating_mul(2));
        for (approach, edge, start) in arms {
            let edge = EdgeId::new(format!("{id}_{edge}"));
            for (index, turn) in [(0_u32, TurnKind::Through), (1, TurnKind::Left)] {
                lanes.push(SyntheticLane {
                    id: LaneId::new(format!("{edge}_{index}")),
                    edge: edge.clone(),
                    group: LaneGroup { approach, turn },
                    shape: vec![start, (start.0 / 2.0, start.1 / 2.0), (0.0, 0.0)],
                    length: LANE_LENGTH,
                });
            }
        }
        Self {
            id: IntersectionId::new(id),
            phase_count,
            lanes,
        }
    }
}

/// A set of independent intersections.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticNetwork {
    /// Intersections in discovery order.
    pub intersections: Vec<SyntheticIntersection>,
}

impl SyntheticNetwork {
    /// One intersection named `TL`.
    pub fn single(phase_count: usize) -> Self {
        Self {
            intersections: vec![SyntheticIntersection::four_way("TL", phase_count)],
        }
    }

    /// `count` intersections named `TL0`, `TL1`, ... (`TL` when `count` is 1).
    pub fn with_intersections(count: u32, phase_count: usize) -> Self {
        if count <= 1 {
            return Self::single(phase_count);
        }
        Self {
            intersections: (0..count)
                .map(|i| SyntheticIntersection::four_way(&format!("TL{i}"), phase_count))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Test hooks
// ---------------------------------------------------------------------------

/// Injected failures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailurePlan {
    /// Lanes whose queries always fail.
    pub fail_lanes: Vec<LaneId>,
    /// Engine time at which `advance` starts failing.
    pub fail_advance_at: Option<u64>,
    /// Whether phase-count queries fail.
    pub fail_phase_count: bool,
}

/// One phase command received by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCommand {
    /// Engine time when the command arrived.
    pub tick: u64,
    /// Target intersection.
    pub intersection: IntersectionId,
    /// Phase code.
    pub code: usize,
}

/// Observable side effects of one session, shared with the test.
#[derive(Debug, Default)]
pub struct SessionLog {
    commands: Mutex<Vec<PhaseCommand>>,
    advances: AtomicU64,
    closed: AtomicBool,
}

impl SessionLog {
    /// Every phase command accepted so far.
    pub fn commands(&self) -> Vec<PhaseCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful `advance` calls.
    pub fn advances(&self) -> u64 {
        self.advances.load(Ordering::Acquire)
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn push(&self, command: PhaseCommand) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }
}

/// Requests a stop on a [`RunControl`] once a session reaches a given time.
#[derive(Debug, Clone)]
pub struct StopTrigger {
    /// Engine time after which the stop is requested.
    pub after: u64,
    /// Control state to signal.
    pub control: Arc<RunControl>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SimVehicle {
    id: VehicleId,
    position: f64,
    waiting: f64,
    halted: bool,
}

#[derive(Debug, Clone)]
struct LaneState {
    meta: SyntheticLane,
    intersection: usize,
    /// Front (closest to the stop line) first.
    vehicles: Vec<SimVehicle>,
}

/// Deterministic in-process engine session.
#[derive(Debug)]
pub struct SyntheticEngine {
    label: String,
    network: SyntheticNetwork,
    lanes: Vec<LaneState>,
    phases: Vec<usize>,
    arrival_rate: f64,
    rng: StdRng,
    time: u64,
    arrived: u32,
    next_vehicle: u64,
    failures: FailurePlan,
    advance_delay: Option<Duration>,
    stop_trigger: Option<StopTrigger>,
    log: Arc<SessionLog>,
    closed: bool,
}

impl SyntheticEngine {
    /// New session over `network`. Each lane spawns a vehicle with
    /// probability `arrival_rate` per tick.
    pub fn new(label: &str, network: SyntheticNetwork, arrival_rate: f64, seed: u64) -> Self {
        let lanes = network
            .intersections
            .iter()
            .enumerate()
            .flat_map(|(index, intersection)| {
                intersection.lanes.iter().map(move |lane| LaneState {
                    meta: lane.clone(),
                    intersection: index,
                    vehicles: Vec::new(),
                })
            })
            .collect();
        let phases = vec![0; network.intersections.len()];
        Self {
            label: label.to_owned(),
            network,
            lanes,
            phases,
            arrival_rate,
            rng: StdRng::seed_from_u64(seed),
            time: 0,
            arrived: 0,
            next_vehicle: 0,
            failures: FailurePlan::default(),
            advance_delay: None,
            stop_trigger: None,
            log: Arc::new(SessionLog::default()),
            closed: false,
        }
    }

    /// Inject failures.
    #[must_use]
    pub fn with_failures(mut self, failures: FailurePlan) -> Self {
        self.failures = failures;
        self
    }

    /// Sleep this long inside every `advance`.
    #[must_use]
    pub const fn with_advance_delay(mut self, delay: Duration) -> Self {
        self.advance_delay = Some(delay);
        self
    }

    /// Request a stop once engine time reaches `trigger.after`.
    #[must_use]
    pub fn with_stop_trigger(mut self, trigger: StopTrigger) -> Self {
        self.stop_trigger = Some(trigger);
        self
    }

    /// Use an existing log (shared with a launcher registry).
    #[must_use]
    pub fn with_log(mut self, log: Arc<SessionLog>) -> Self {
        self.log = log;
        self
    }

    /// Shared side-effect log.
    pub fn log(&self) -> Arc<SessionLog> {
        Arc::clone(&self.log)
    }

    /// Current phase code of an intersection.
    pub fn phase(&self, intersection: &IntersectionId) -> Option<usize> {
        let index = self.intersection_index(intersection)?;
        self.phases.get(index).copied()
    }

    /// Place a vehicle on a lane at `position` metres from the lane start.
    ///
    /// Returns `None` if the lane is unknown.
    pub fn place_vehicle(
        &mut self,
        lane: &LaneId,
        position: f64,
        waiting: f64,
    ) -> Option<VehicleId> {
        let id = self.fresh_vehicle_id();
        let state = self.lanes.iter_mut().find(|l| &l.meta.id == lane)?;
        state.vehicles.push(SimVehicle {
            id: id.clone(),
            position,
            waiting,
            halted: waiting > 0.0,
        });
        state
            .vehicles
            .sort_by(|a, b| b.position.total_cmp(&a.position));
        Some(id)
    }

    fn fresh_vehicle_id(&mut self) -> VehicleId {
        let id = VehicleId::new(format!("veh_{}", self.next_vehicle));
        self.next_vehicle = self.next_vehicle.saturating_add(1);
        id
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed {
            Err(EngineError::Disconnected {
                label: self.label.clone(),
            })
        } else {
            Ok(())
        }
    }

    fn intersection_index(&self, id: &IntersectionId) -> Option<usize> {
        self.network.intersections.iter().position(|i| &i.id == id)
    }

    fn lane(&self, lane: &LaneId) -> Result<&LaneState, EngineError> {
        self.ensure_open()?;
        if self.failures.fail_lanes.contains(lane) {
            return Err(EngineError::Rejected {
                message: format!("injected failure on lane {lane}"),
            });
        }
        self.lanes
            .iter()
            .find(|l| &l.meta.id == lane)
            .ok_or_else(|| EngineError::Unknown {
                kind: "lane",
                id: lane.to_string(),
            })
    }

    fn vehicle(&self, vehicle: &VehicleId) -> Result<&SimVehicle, EngineError> {
        self.ensure_open()?;
        self.lanes
            .iter()
            .flat_map(|l| &l.vehicles)
            .find(|v| &v.id == vehicle)
            .ok_or_else(|| EngineError::Unknown {
                kind: "vehicle",
                id: vehicle.to_string(),
            })
    }

    /// Whether the phase code gives green to the lane group.
    fn serves(code: usize, group: LaneGroup) -> bool {
        if code % 2 == 1 {
            return false;
        }
        let north_south = matches!(group.approach, Approach::North | Approach::South);
        match (code / 2, north_south, group.turn) {
            (0, true, TurnKind::Through)
            | (1, true, TurnKind::Left)
            | (2, false, TurnKind::Through)
            | (3, false, TurnKind::Left) => true,
            _ => false,
        }
    }

    fn move_vehicles(&mut self) {
        let mut arrived: u32 = 0;
        for lane in &mut self.lanes {
            let code = self.phases.get(lane.intersection).copied().unwrap_or(0);
            let served = Self::serves(code, lane.meta.group);
            let stop_line = lane.meta.length - STOP_OFFSET;

            let mut limit = stop_line;
            let mut discharged = false;
            for (index, vehicle) in lane.vehicles.iter_mut().enumerate() {
                let target = vehicle.position + SPEED;
                if index == 0 && served && target >= lane.meta.length {
                    discharged = true;
                    vehicle.position = lane.meta.length;
                    limit = f64::INFINITY;
                    continue;
                }
                if index == 1 && discharged {
                    limit = stop_line;
                }
                let next = target.min(limit);
                let moved = next - vehicle.position;
                vehicle.halted = moved < 0.1;
                if vehicle.halted {
                    vehicle.waiting += 1.0;
                } else {
                    vehicle.position = next;
                }
                limit = vehicle.position - GAP;
            }
            if discharged && !lane.vehicles.is_empty() {
                lane.vehicles.remove(0);
                arrived = arrived.saturating_add(1);
            }
        }
        self.arrived = arrived;
    }

    fn spawn_vehicles(&mut self) {
        for index in 0..self.lanes.len() {
            let draw: f64 = self.rng.random::<f64>();
            if draw >= self.arrival_rate {
                continue;
            }
            let id = self.fresh_vehicle_id();
            let Some(lane) = self.lanes.get_mut(index) else {
                continue;
            };
            let tail_clear = lane.vehicles.last().is_none_or(|v| v.position >= GAP);
            if tail_clear {
                lane.vehicles.push(SimVehicle {
                    id,
                    position: 0.0,
                    waiting: 0.0,
                    halted: false,
                });
            }
        }
    }
}

impl EngineSession for SyntheticEngine {
    fn label(&self) -> &str {
        &self.label
    }

    fn advance(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        if let Some(delay) = self.advance_delay {
            std::thread::sleep(delay);
        }
        if self.failures.fail_advance_at.is_some_and(|at| self.time >= at) {
            return Err(EngineError::Disconnected {
                label: self.label.clone(),
            });
        }
        self.time = self.time.saturating_add(1);
        self.move_vehicles();
        self.spawn_vehicles();
        self.log.advances.fetch_add(1, Ordering::AcqRel);
        if let Some(trigger) = &self.stop_trigger
            && self.time >= trigger.after
        {
            trigger.control.request_stop();
        }
        Ok(())
    }

    fn intersection_ids(&mut self) -> Result<Vec<IntersectionId>, EngineError> {
        self.ensure_open()?;
        Ok(self
            .network
            .intersections
            .iter()
            .map(|i| i.id.clone())
            .collect())
    }

    fn phase_count(&mut self, intersection: &IntersectionId) -> Result<usize, EngineError> {
        self.ensure_open()?;
        if self.failures.fail_phase_count {
            return Err(EngineError::Rejected {
                message: "injected phase count failure".to_owned(),
            });
        }
        self.network
            .intersections
            .iter()
            .find(|i| &i.id == intersection)
            .map(|i| i.phase_count)
            .ok_or_else(|| EngineError::Unknown {
                kind: "intersection",
                id: intersection.to_string(),
            })
    }

    fn controlled_lanes(
        &mut self,
        intersection: &IntersectionId,
    ) -> Result<Vec<LaneId>, EngineError> {
        self.ensure_open()?;
        let found = self
            .network
            .intersections
            .iter()
            .find(|i| &i.id == intersection)
            .ok_or_else(|| EngineError::Unknown {
                kind: "intersection",
                id: intersection.to_string(),
            })?;
        // One entry per controlled link: every lane appears twice.
        Ok(found
            .lanes
            .iter()
            .flat_map(|lane| [lane.id.clone(), lane.id.clone()])
            .collect())
    }

    fn lane_shape(&mut self, lane: &LaneId) -> Result<Vec<(f64, f64)>, EngineError> {
        Ok(self.lane(lane)?.meta.shape.clone())
    }

    fn lane_length(&mut self, lane: &LaneId) -> Result<f64, EngineError> {
        Ok(self.lane(lane)?.meta.length)
    }

    fn lane_edge(&mut self, lane: &LaneId) -> Result<EdgeId, EngineError> {
        Ok(self.lane(lane)?.meta.edge.clone())
    }

    fn edge_lane_count(&mut self, edge: &EdgeId) -> Result<u32, EngineError> {
        self.ensure_open()?;
        let count = self.lanes.iter().filter(|l| &l.meta.edge == edge).count();
        if count == 0 {
            return Err(EngineError::Unknown {
                kind: "edge",
                id: edge.to_string(),
            });
        }
        u32::try_from(count).map_err(|err| EngineError::Protocol {
            message: format!("edge {edge} lane count: {err}"),
        })
    }

    fn lane_vehicles(&mut self, lane: &LaneId) -> Result<Vec<VehicleId>, EngineError> {
        Ok(self
            .lane(lane)?
            .vehicles
            .iter()
            .map(|v| v.id.clone())
            .collect())
    }

    fn halted_count(&mut self, lane: &LaneId) -> Result<u32, EngineError> {
        let halted = self.lane(lane)?.vehicles.iter().filter(|v| v.halted).count();
        Ok(u32::try_from(halted).unwrap_or(u32::MAX))
    }

    fn vehicle_lane_position(&mut self, vehicle: &VehicleId) -> Result<f64, EngineError> {
        Ok(self.vehicle(vehicle)?.position)
    }

    fn vehicle_waiting_time(&mut self, vehicle: &VehicleId) -> Result<f64, EngineError> {
        Ok(self.vehicle(vehicle)?.waiting)
    }

    fn arrived_count(&mut self) -> Result<u32, EngineError> {
        self.ensure_open()?;
        Ok(self.arrived)
    }

    fn set_phase(&mut self, intersection: &IntersectionId, code: usize) -> Result<(), EngineError> {
        self.ensure_open()?;
        let index = self
            .intersection_index(intersection)
            .ok_or_else(|| EngineError::Unknown {
                kind: "intersection",
                id: intersection.to_string(),
            })?;
        let phase_count = self
            .network
            .intersections
            .get(index)
            .map_or(0, |i| i.phase_count);
        if code >= phase_count {
            return Err(EngineError::Rejected {
                message: format!("phase {code} out of range for {intersection} ({phase_count} phases)"),
            });
        }
        if let Some(slot) = self.phases.get_mut(index) {
            *slot = code;
        }
        self.log.push(PhaseCommand {
            tick: self.time,
            intersection: intersection.clone(),
            code,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.closed = true;
        self.log.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Logs of every session a [`SyntheticLauncher`] started, by label.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    logs: Mutex<BTreeMap<String, Arc<SessionLog>>>,
}

impl SessionRegistry {
    /// Log of the session with this label.
    pub fn get(&self, label: &str) -> Option<Arc<SessionLog>> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(label)
            .cloned()
    }

    /// Labels of every session started so far.
    pub fn labels(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn insert(&self, label: &str, log: Arc<SessionLog>) {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(label.to_owned(), log);
    }
}

/// Launches [`SyntheticEngine`] sessions.
#[derive(Debug)]
pub struct SyntheticLauncher {
    network: SyntheticNetwork,
    arrival_rate: f64,
    failures: BTreeMap<String, FailurePlan>,
    fail_launch: Vec<String>,
    advance_delay: Option<Duration>,
    stop_trigger: Option<(String, StopTrigger)>,
    registry: Arc<SessionRegistry>,
}

impl SyntheticLauncher {
    /// Launcher for `network` with the given per-lane arrival rate.
    pub fn new(network: SyntheticNetwork, arrival_rate: f64) -> Self {
        Self {
            network,
            arrival_rate,
            failures: BTreeMap::new(),
            fail_launch: Vec::new(),
            advance_delay: None,
            stop_trigger: None,
            registry: Arc::new(SessionRegistry::default()),
        }
    }

    /// Launcher built from the `engine.synthetic` config section.
    pub fn from_config(config: &SyntheticConfig) -> Self {
        Self::new(
            SyntheticNetwork::with_intersections(config.intersections, 8),
            config.arrival_rate,
        )
    }

    /// Inject failures into the session with this label.
    #[must_use]
    pub fn with_failures(mut self, label: &str, failures: FailurePlan) -> Self {
        self.failures.insert(label.to_owned(), failures);
        self
    }

    /// Refuse to launch the session with this label.
    #[must_use]
    pub fn failing_launch(mut self, label: &str) -> Self {
        self.fail_launch.push(label.to_owned());
        self
    }

    /// Sleep this long inside every `advance` of every session.
    #[must_use]
    pub const fn with_advance_delay(mut self, delay: Duration) -> Self {
        self.advance_delay = Some(delay);
        self
    }

    /// Request a stop when the labeled session reaches `trigger.after`.
    #[must_use]
    pub fn with_stop_trigger(mut self, label: &str, trigger: StopTrigger) -> Self {
        self.stop_trigger = Some((label.to_owned(), trigger));
        self
    }

    /// Registry of started sessions, shared with the caller.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }
}

impl EngineLauncher for SyntheticLauncher {
    fn launch(&mut self, spec: &SessionSpec) -> Result<Box<dyn EngineSession>, EngineError> {
        if self.fail_launch.contains(&spec.label) {
            return Err(EngineError::Launch {
                label: spec.label.clone(),
                message: "injected launch failure".to_owned(),
            });
        }
        let log = Arc::new(SessionLog::default());
        self.registry.insert(&spec.label, Arc::clone(&log));

        let mut engine = SyntheticEngine::new(
            &spec.label,
            self.network.clone(),
            self.arrival_rate,
            spec.seed,
        )
        .with_log(log);
        if let Some(failures) = self.failures.get(&spec.label) {
            engine = engine.with_failures(failures.clone());
        }
        if let Some(delay) = self.advance_delay {
            engine = engine.with_advance_delay(delay);
        }
        if let Some((label, trigger)) = &self.stop_trigger
            && label == &spec.label
        {
            engine = engine.with_stop_trigger(trigger.clone());
        }
        Ok(Box::new(engine))
    }
}
