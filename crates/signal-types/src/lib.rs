//! Shared type definitions for the adaptive signal control comparison.
//!
//! This crate is the single source of truth for the payloads that cross
//! crate boundaries: engine-side identifiers, lane groups, per-tick
//! metrics, decisions, streamed records, and run reports. Types flow to
//! `TypeScript` via `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Newtypes for engine names and run identifiers
//! - [`enums`] -- Approaches, signal actions, controller and strategy labels
//! - [`structs`] -- Metrics, decisions, summaries, and reports

pub mod enums;
pub mod ids;
pub mod structs;

pub use enums::{Approach, ControllerKind, EndReason, SignalAction, Strategy, TurnKind};
pub use ids::{EdgeId, IntersectionId, LaneId, RunId, VehicleId};
pub use structs::{
    Comparison, ControllerReport, Decision, Improvement, LaneGroup, MetricsRecord, RunReport,
    RunSummary, TickMetrics, TimeSeries,
};
