//! Capability interface to the external simulation engine.
//!
//! The control loop never talks to a simulator directly. It drives an
//! [`EngineSession`] (one labeled, running engine instance) obtained from
//! an [`EngineLauncher`]. Production code plugs in the TraCI client; tests
//! and dry runs plug in [`SyntheticEngine`].
//!
//! Every method is a plain request/response call. `advance` is the only
//! one expected to block for a noticeable time.
//!
//! [`SyntheticEngine`]: crate::synthetic::SyntheticEngine

use std::path::PathBuf;

use signal_types::{EdgeId, IntersectionId, LaneId, VehicleId};

/// Errors reported by an engine session or launcher.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine does not know the requested object.
    #[error("unknown {kind} '{id}'")]
    Unknown {
        /// Object kind (lane, edge, vehicle, intersection).
        kind: &'static str,
        /// Requested identifier.
        id: String,
    },

    /// The session has been closed or the connection dropped.
    #[error("session '{label}' is disconnected")]
    Disconnected {
        /// Session label.
        label: String,
    },

    /// The engine refused a query or command.
    #[error("engine rejected request: {message}")]
    Rejected {
        /// Engine-supplied description.
        message: String,
    },

    /// The engine process could not be started or reached.
    #[error("failed to launch session '{label}': {message}")]
    Launch {
        /// Session label.
        label: String,
        /// What went wrong.
        message: String,
    },

    /// The engine sent something that does not decode.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the malformed exchange.
        message: String,
    },

    /// Transport-level I/O failure.
    #[error("engine I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// Parameters for starting one engine session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    /// Unique label; also names the session in logs.
    pub label: String,
    /// Route/demand file both sessions of a run consume.
    pub route_file: PathBuf,
    /// Engine seed, shared by both sessions of a run.
    pub seed: u64,
}

/// One running, independently labeled engine instance.
///
/// All methods take `&mut self`: a session is a single request/response
/// channel and is never shared between threads.
pub trait EngineSession: Send {
    /// Session label.
    fn label(&self) -> &str;

    /// Step the engine by one tick, blocking until it acknowledges.
    fn advance(&mut self) -> Result<(), EngineError>;

    /// All signalized intersections in the network.
    fn intersection_ids(&mut self) -> Result<Vec<IntersectionId>, EngineError>;

    /// Number of phases in the intersection's active signal program.
    fn phase_count(&mut self, intersection: &IntersectionId) -> Result<usize, EngineError>;

    /// Lanes controlled by the intersection (may contain duplicates).
    fn controlled_lanes(&mut self, intersection: &IntersectionId)
    -> Result<Vec<LaneId>, EngineError>;

    /// Lane centre-line geometry, upstream to stop line.
    fn lane_shape(&mut self, lane: &LaneId) -> Result<Vec<(f64, f64)>, EngineError>;

    /// Lane length in metres.
    fn lane_length(&mut self, lane: &LaneId) -> Result<f64, EngineError>;

    /// Edge the lane belongs to.
    fn lane_edge(&mut self, lane: &LaneId) -> Result<EdgeId, EngineError>;

    /// Number of lanes on the edge.
    fn edge_lane_count(&mut self, edge: &EdgeId) -> Result<u32, EngineError>;

    /// Vehicles on the lane during the last tick.
    fn lane_vehicles(&mut self, lane: &LaneId) -> Result<Vec<VehicleId>, EngineError>;

    /// Halted vehicles on the lane during the last tick.
    fn halted_count(&mut self, lane: &LaneId) -> Result<u32, EngineError>;

    /// Vehicle position along its current lane, in metres from the lane start.
    fn vehicle_lane_position(&mut self, vehicle: &VehicleId) -> Result<f64, EngineError>;

    /// Vehicle accumulated waiting time in seconds.
    fn vehicle_waiting_time(&mut self, vehicle: &VehicleId) -> Result<f64, EngineError>;

    /// Vehicles that reached their destination during the last tick.
    fn arrived_count(&mut self) -> Result<u32, EngineError>;

    /// Switch the intersection to the given phase code.
    fn set_phase(&mut self, intersection: &IntersectionId, code: usize)
    -> Result<(), EngineError>;

    /// Close the session and release the engine process.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Starts engine sessions.
pub trait EngineLauncher: Send {
    /// Start a new session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Launch`] if the engine cannot be started or
    /// reached.
    fn launch(&mut self, spec: &SessionSpec) -> Result<Box<dyn EngineSession>, EngineError>;
}
