//! Protocol constants: command ids, variable ids, and value type tags.

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Query the server's API version.
pub const CMD_GET_VERSION: u8 = 0x00;
/// Advance the simulation.
pub const CMD_SIMULATION_STEP: u8 = 0x02;
/// Close the connection and end the simulation.
pub const CMD_CLOSE: u8 = 0x7F;

/// Get a traffic light variable.
pub const CMD_GET_TL_VARIABLE: u8 = 0xa2;
/// Get a lane variable.
pub const CMD_GET_LANE_VARIABLE: u8 = 0xa3;
/// Get a vehicle variable.
pub const CMD_GET_VEHICLE_VARIABLE: u8 = 0xa4;
/// Get an edge variable.
pub const CMD_GET_EDGE_VARIABLE: u8 = 0xaa;
/// Get a simulation variable.
pub const CMD_GET_SIM_VARIABLE: u8 = 0xab;
/// Set a traffic light variable.
pub const CMD_SET_TL_VARIABLE: u8 = 0xc2;

/// Offset from a get command id to its response id.
pub const RESPONSE_OFFSET: u8 = 0x10;

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// List of all object ids in a domain.
pub const ID_LIST: u8 = 0x00;
/// Vehicle ids on a lane during the last step.
pub const LAST_STEP_VEHICLE_ID_LIST: u8 = 0x12;
/// Halting vehicles on a lane during the last step.
pub const LAST_STEP_VEHICLE_HALTING_NUMBER: u8 = 0x14;
/// Phase index of a traffic light.
pub const TL_PHASE_INDEX: u8 = 0x22;
/// Lanes controlled by a traffic light.
pub const TL_CONTROLLED_LANES: u8 = 0x26;
/// Complete program definitions of a traffic light.
pub const TL_COMPLETE_DEFINITION_RYG: u8 = 0x2b;
/// Edge id of a lane.
pub const LANE_EDGE_ID: u8 = 0x31;
/// Lane length.
pub const VAR_LENGTH: u8 = 0x44;
/// Lane shape polygon.
pub const VAR_SHAPE: u8 = 0x4e;
/// Lane count of an edge.
pub const VAR_LANE_INDEX: u8 = 0x52;
/// Vehicle position along its lane.
pub const VAR_LANEPOSITION: u8 = 0x56;
/// Vehicles that arrived during the last step.
pub const VAR_ARRIVED_VEHICLES_NUMBER: u8 = 0x79;
/// Accumulated waiting time of a vehicle.
pub const VAR_ACCUMULATED_WAITING_TIME: u8 = 0x87;

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Polygon: point count followed by coordinate pairs.
pub const TYPE_POLYGON: u8 = 0x06;
/// Signed 32-bit integer.
pub const TYPE_INTEGER: u8 = 0x09;
/// 64-bit float.
pub const TYPE_DOUBLE: u8 = 0x0B;
/// Length-prefixed string.
pub const TYPE_STRING: u8 = 0x0C;
/// Count-prefixed string list.
pub const TYPE_STRINGLIST: u8 = 0x0E;
/// Compound value: item count followed by typed items.
pub const TYPE_COMPOUND: u8 = 0x0F;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Command succeeded.
pub const RTYPE_OK: u8 = 0x00;
