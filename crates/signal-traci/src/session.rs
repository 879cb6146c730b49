//! [`EngineSession`] implementation backed by a simulator process.

use std::process::Child;
use std::time::Duration;

use signal_core::engine::{EngineError, EngineSession};
use signal_types::{EdgeId, IntersectionId, LaneId, VehicleId};
use tracing::{info, warn};

use crate::client::TraciClient;
use crate::codec;
use crate::constants::{
    CMD_GET_EDGE_VARIABLE, CMD_GET_LANE_VARIABLE, CMD_GET_SIM_VARIABLE, CMD_GET_TL_VARIABLE,
    CMD_GET_VEHICLE_VARIABLE, ID_LIST, LANE_EDGE_ID, LAST_STEP_VEHICLE_HALTING_NUMBER,
    LAST_STEP_VEHICLE_ID_LIST, TL_COMPLETE_DEFINITION_RYG, TL_CONTROLLED_LANES,
    VAR_ACCUMULATED_WAITING_TIME, VAR_ARRIVED_VEHICLES_NUMBER, VAR_LANE_INDEX, VAR_LANEPOSITION,
    VAR_LENGTH, VAR_SHAPE,
};
use crate::error::TraciError;

/// Polls of the child process after a close before it is killed.
const EXIT_POLLS: u32 = 40;

/// Delay between exit polls.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A labeled simulator process and the connection driving it.
#[derive(Debug)]
pub struct TraciSession {
    label: String,
    client: Option<TraciClient>,
    child: Option<Child>,
}

impl TraciSession {
    /// Session over an already connected client. `child` is the process to
    /// reap on close, if this session started one.
    pub fn new(label: &str, client: TraciClient, child: Option<Child>) -> Self {
        Self {
            label: label.to_owned(),
            client: Some(client),
            child,
        }
    }

    fn client(&mut self) -> Result<&mut TraciClient, EngineError> {
        self.client
            .as_mut()
            .ok_or_else(|| EngineError::Disconnected {
                label: self.label.clone(),
            })
    }

    fn non_negative(value: i32) -> Result<u32, EngineError> {
        u32::try_from(value).map_err(|source| {
            EngineError::from(TraciError::Count {
                value: i64::from(value),
                source,
            })
        })
    }
}

impl EngineSession for TraciSession {
    fn label(&self) -> &str {
        &self.label
    }

    fn advance(&mut self) -> Result<(), EngineError> {
        Ok(self.client()?.simulation_step()?)
    }

    fn intersection_ids(&mut self) -> Result<Vec<IntersectionId>, EngineError> {
        let ids = self
            .client()?
            .get_string_list(CMD_GET_TL_VARIABLE, ID_LIST, "")?;
        Ok(ids.into_iter().map(IntersectionId::from).collect())
    }

    fn phase_count(&mut self, intersection: &IntersectionId) -> Result<usize, EngineError> {
        let definition = self.client()?.get_variable(
            CMD_GET_TL_VARIABLE,
            TL_COMPLETE_DEFINITION_RYG,
            intersection.as_str(),
        )?;
        Ok(codec::parse_phase_count(&definition)?)
    }

    fn controlled_lanes(
        &mut self,
        intersection: &IntersectionId,
    ) -> Result<Vec<LaneId>, EngineError> {
        let lanes = self.client()?.get_string_list(
            CMD_GET_TL_VARIABLE,
            TL_CONTROLLED_LANES,
            intersection.as_str(),
        )?;
        Ok(lanes.into_iter().map(LaneId::from).collect())
    }

    fn lane_shape(&mut self, lane: &LaneId) -> Result<Vec<(f64, f64)>, EngineError> {
        Ok(self
            .client()?
            .get_polygon(CMD_GET_LANE_VARIABLE, VAR_SHAPE, lane.as_str())?)
    }

    fn lane_length(&mut self, lane: &LaneId) -> Result<f64, EngineError> {
        Ok(self
            .client()?
            .get_f64(CMD_GET_LANE_VARIABLE, VAR_LENGTH, lane.as_str())?)
    }

    fn lane_edge(&mut self, lane: &LaneId) -> Result<EdgeId, EngineError> {
        let edge = self
            .client()?
            .get_string(CMD_GET_LANE_VARIABLE, LANE_EDGE_ID, lane.as_str())?;
        Ok(EdgeId::from(edge))
    }

    fn edge_lane_count(&mut self, edge: &EdgeId) -> Result<u32, EngineError> {
        let lanes = self
            .client()?
            .get_i32(CMD_GET_EDGE_VARIABLE, VAR_LANE_INDEX, edge.as_str())?;
        Self::non_negative(lanes)
    }

    fn lane_vehicles(&mut self, lane: &LaneId) -> Result<Vec<VehicleId>, EngineError> {
        let vehicles = self.client()?.get_string_list(
            CMD_GET_LANE_VARIABLE,
            LAST_STEP_VEHICLE_ID_LIST,
            lane.as_str(),
        )?;
        Ok(vehicles.into_iter().map(VehicleId::from).collect())
    }

    fn halted_count(&mut self, lane: &LaneId) -> Result<u32, EngineError> {
        let halted = self.client()?.get_i32(
            CMD_GET_LANE_VARIABLE,
            LAST_STEP_VEHICLE_HALTING_NUMBER,
            lane.as_str(),
        )?;
        Self::non_negative(halted)
    }

    fn vehicle_lane_position(&mut self, vehicle: &VehicleId) -> Result<f64, EngineError> {
        Ok(self
            .client()?
            .get_f64(CMD_GET_VEHICLE_VARIABLE, VAR_LANEPOSITION, vehicle.as_str())?)
    }

    fn vehicle_waiting_time(&mut self, vehicle: &VehicleId) -> Result<f64, EngineError> {
        Ok(self.client()?.get_f64(
            CMD_GET_VEHICLE_VARIABLE,
            VAR_ACCUMULATED_WAITING_TIME,
            vehicle.as_str(),
        )?)
    }

    fn arrived_count(&mut self) -> Result<u32, EngineError> {
        let arrived =
            self.client()?
                .get_i32(CMD_GET_SIM_VARIABLE, VAR_ARRIVED_VEHICLES_NUMBER, "")?;
        Self::non_negative(arrived)
    }

    fn set_phase(&mut self, intersection: &IntersectionId, code: usize) -> Result<(), EngineError> {
        let index = i32::try_from(code)
            .map_err(|source| EngineError::from(TraciError::TooLarge { len: code, source }))?;
        Ok(self.client()?.set_phase(intersection.as_str(), index)?)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        let closed = self.client.take().map_or(Ok(()), |mut client| client.close());
        if let Some(child) = self.child.take() {
            reap(&self.label, child);
        }
        info!(label = %self.label, "Engine session closed");
        Ok(closed?)
    }
}

impl Drop for TraciSession {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate(&self.label, &mut child);
        }
    }
}

/// Wait for a process that was asked to exit, killing it if it lingers.
fn reap(label: &str, mut child: Child) {
    for _ in 0..EXIT_POLLS {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => std::thread::sleep(EXIT_POLL_INTERVAL),
            Err(err) => {
                warn!(label, error = %err, "Failed to poll simulator process");
                break;
            }
        }
    }
    terminate(label, &mut child);
}

/// Kill a simulator process and collect its exit status.
pub(crate) fn terminate(label: &str, child: &mut Child) {
    if let Err(err) = child.kill() {
        warn!(label, error = %err, "Failed to kill simulator process");
    }
    if let Err(err) = child.wait() {
        warn!(label, error = %err, "Failed to reap simulator process");
    }
}
