//! Enumeration types for signal control runs.
//!
//! Covers approach geometry (which arm of the intersection a lane feeds),
//! the canonical signal actions and their phase codes, and the labels used
//! to tell the two controllers apart in reports and streamed records.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Approach geometry
// ---------------------------------------------------------------------------

/// The arm of an intersection a lane approaches from.
///
/// Derived from the bearing of the lane's terminal segment: a lane heading
/// east at the stop line sits on the western arm, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    /// Western arm, traffic heading east.
    West,
    /// Northern arm, traffic heading south.
    North,
    /// Eastern arm, traffic heading west.
    East,
    /// Southern arm, traffic heading north.
    South,
}

impl Approach {
    /// Classify a travel bearing in degrees (0 = east, counter-clockwise).
    ///
    /// Quadrant boundaries sit at 45, 135, 225, and 315 degrees. Any finite
    /// input is normalized into `[0, 360)` first.
    pub fn from_bearing(degrees: f64) -> Self {
        let bearing = degrees.rem_euclid(360.0);
        if (45.0..135.0).contains(&bearing) {
            Self::South
        } else if (135.0..225.0).contains(&bearing) {
            Self::East
        } else if (225.0..315.0).contains(&bearing) {
            Self::North
        } else {
            Self::West
        }
    }

    /// First lane-group index belonging to this approach.
    ///
    /// Each approach owns two consecutive groups: through traffic at the
    /// base index and the left-turn lane at base + 1.
    pub const fn base_group(self) -> u8 {
        match self {
            Self::West => 0,
            Self::North => 2,
            Self::East => 4,
            Self::South => 6,
        }
    }
}

/// Movement served by a lane at the stop line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// Straight-through (and right-turn) traffic.
    Through,
    /// Dedicated left-turn lane.
    Left,
}

// ---------------------------------------------------------------------------
// Signal actions
// ---------------------------------------------------------------------------

/// One of the four green movements a controller can choose.
///
/// Each action owns a green phase code and the clearance (yellow) code
/// that immediately follows it in the signal program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    /// North-south straight.
    NorthSouth,
    /// North-south protected left.
    NorthSouthLeft,
    /// East-west straight.
    EastWest,
    /// East-west protected left.
    EastWestLeft,
}

impl SignalAction {
    /// All actions in policy output order.
    pub const ALL: [Self; 4] = [
        Self::NorthSouth,
        Self::NorthSouthLeft,
        Self::EastWest,
        Self::EastWestLeft,
    ];

    /// Policy output index of this action.
    pub const fn index(self) -> usize {
        match self {
            Self::NorthSouth => 0,
            Self::NorthSouthLeft => 1,
            Self::EastWest => 2,
            Self::EastWestLeft => 3,
        }
    }

    /// Canonical green phase code in the signal program.
    pub const fn green_code(self) -> usize {
        match self {
            Self::NorthSouth => 0,
            Self::NorthSouthLeft => 2,
            Self::EastWest => 4,
            Self::EastWestLeft => 6,
        }
    }

    /// Canonical clearance phase code; always the successor of the green.
    pub const fn clearance_code(self) -> usize {
        match self {
            Self::NorthSouth => 1,
            Self::NorthSouthLeft => 3,
            Self::EastWest => 5,
            Self::EastWestLeft => 7,
        }
    }
}

// ---------------------------------------------------------------------------
// Run labels
// ---------------------------------------------------------------------------

/// Which controller family drives a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    /// Policy-driven adaptive control.
    Adaptive,
    /// Fixed-time round-robin baseline.
    Fixed,
}

impl ControllerKind {
    /// Session label used when starting the engine for this controller.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Adaptive => "adaptive",
            Self::Fixed => "fixed",
        }
    }
}

impl core::fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// What a run invocation should execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Adaptive controller only.
    Adaptive,
    /// Fixed-time controller only.
    Fixed,
    /// Both controllers in lockstep against identical demand.
    Both,
}

impl Strategy {
    /// Controllers that take part in a run with this strategy.
    pub fn controllers(self) -> &'static [ControllerKind] {
        match self {
            Self::Adaptive => &[ControllerKind::Adaptive],
            Self::Fixed => &[ControllerKind::Fixed],
            Self::Both => &[ControllerKind::Adaptive, ControllerKind::Fixed],
        }
    }
}

impl core::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adaptive" | "rl" => Ok(Self::Adaptive),
            "fixed" => Ok(Self::Fixed),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The configured tick limit was reached.
    MaxTicksReached,
    /// An external stop request was observed at a tick boundary.
    OperatorStop,
    /// A session failed to start or step; the run was aborted.
    Failed,
}
