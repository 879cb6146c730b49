//! Metric, decision, and report structs shared across the workspace.
//!
//! Everything here is serializable and exported to `TypeScript` so the
//! dashboard consumes exactly the shapes the control loop produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{Approach, ControllerKind, EndReason, Strategy, TurnKind};
use crate::ids::{IntersectionId, RunId};

// ---------------------------------------------------------------------------
// Lane groups
// ---------------------------------------------------------------------------

/// Classification of a controlled lane by approach and movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LaneGroup {
    /// Arm of the intersection the lane feeds.
    pub approach: Approach,
    /// Movement the lane serves.
    pub turn: TurnKind,
}

impl LaneGroup {
    /// Number of distinct lane groups (4 approaches x 2 movements).
    pub const COUNT: u8 = 8;

    /// Group index in `[0, COUNT)` used to address the state vector.
    pub const fn index(self) -> u8 {
        let base = self.approach.base_group();
        match self.turn {
            TurnKind::Through => base,
            // base_group is at most 6, so this stays below COUNT.
            TurnKind::Left => base.saturating_add(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-tick metrics
// ---------------------------------------------------------------------------

/// Metrics for one session over one tick, summed across intersections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TickMetrics {
    /// Sum of per-intersection average accumulated waiting time (seconds).
    pub waiting_time: f64,
    /// Number of halted vehicles on controlled lanes.
    pub queue_length: u32,
    /// Vehicles that reached their destination during this tick.
    pub throughput: u32,
}

/// One policy consultation recorded by a phase controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Decision {
    /// Tick on which the decision was taken.
    pub tick: u64,
    /// Occupancy state vector the decision was based on.
    pub state: Vec<u8>,
    /// Chosen action index.
    pub action: usize,
    /// Total accumulated waiting time on the approaches at decision time.
    pub waiting_time: f64,
    /// Halted vehicles on the approaches at decision time.
    pub queue_length: u32,
    /// Whether the fixed-time fallback replaced a failed policy call.
    pub fallback: bool,
}

/// Streamed record pushed to the outbound queue once per tick.
///
/// Serialized with a `controller` tag of `both`, `adaptive`, or `fixed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "controller", rename_all = "snake_case")]
pub enum MetricsRecord {
    /// Combined snapshot from a dual run.
    Both {
        /// Tick index (0-based).
        tick: u64,
        /// Adaptive session metrics.
        adaptive: TickMetrics,
        /// Fixed-time session metrics.
        fixed: TickMetrics,
    },
    /// Snapshot from an adaptive-only run.
    Adaptive {
        /// Tick index (0-based).
        tick: u64,
        /// Session metrics.
        metrics: TickMetrics,
    },
    /// Snapshot from a fixed-only run.
    Fixed {
        /// Tick index (0-based).
        tick: u64,
        /// Session metrics.
        metrics: TickMetrics,
    },
}

impl MetricsRecord {
    /// Build a single-controller record.
    pub const fn single(kind: ControllerKind, tick: u64, metrics: TickMetrics) -> Self {
        match kind {
            ControllerKind::Adaptive => Self::Adaptive { tick, metrics },
            ControllerKind::Fixed => Self::Fixed { tick, metrics },
        }
    }

    /// Tick the record belongs to.
    pub const fn tick(&self) -> u64 {
        match self {
            Self::Both { tick, .. } | Self::Adaptive { tick, .. } | Self::Fixed { tick, .. } => {
                *tick
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Reduction of one session's full tick-metrics sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunSummary {
    /// Controller that produced the sequence.
    pub controller: ControllerKind,
    /// Number of ticks in the sequence.
    pub ticks: u64,
    /// Mean of per-tick waiting time.
    pub avg_waiting_time: f64,
    /// Maximum per-tick waiting time.
    pub max_waiting_time: f64,
    /// Mean of per-tick queue length.
    pub avg_queue_length: f64,
    /// Maximum per-tick queue length.
    pub max_queue_length: u32,
    /// Total arrived vehicles over the run.
    pub total_throughput: u64,
    /// Wall-clock duration of the run loop in seconds.
    pub elapsed_seconds: f64,
}

/// Relative improvement of the adaptive controller over the baseline.
///
/// All values are percentages; positive means the adaptive controller did
/// better. A zero baseline yields 0 rather than a division by zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Improvement {
    /// `(fixed - adaptive) / fixed * 100` on mean waiting time.
    pub waiting_time_reduction: f64,
    /// `(fixed - adaptive) / fixed * 100` on mean queue length.
    pub queue_length_reduction: f64,
    /// `(adaptive - fixed) / fixed * 100` on total throughput.
    pub throughput_increase: f64,
}

/// Downsampled per-tick series for charting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TimeSeries {
    /// Adaptive waiting time, every Nth tick.
    pub adaptive_waiting: Vec<f64>,
    /// Fixed-time waiting time, every Nth tick.
    pub fixed_waiting: Vec<f64>,
    /// Adaptive queue length, every Nth tick.
    pub adaptive_queue: Vec<u32>,
    /// Fixed-time queue length, every Nth tick.
    pub fixed_queue: Vec<u32>,
}

/// Side-by-side comparison of the two controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Comparison {
    /// Adaptive session summary.
    pub adaptive: RunSummary,
    /// Fixed-time session summary.
    pub fixed: RunSummary,
    /// Relative improvement block.
    pub improvement: Improvement,
    /// Downsampled series for charts.
    pub time_series: TimeSeries,
}

/// Per-intersection controller statistics collected over a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ControllerReport {
    /// Intersection the controller was bound to.
    pub intersection: IntersectionId,
    /// Controller family.
    pub controller: ControllerKind,
    /// Number of times the controller entered a clearance phase.
    pub phase_changes: u64,
    /// Mean of the controller's per-tick average waiting time.
    pub avg_waiting_time: f64,
    /// Mean of the controller's per-tick queue length.
    pub avg_queue_length: f64,
    /// Every decision the controller took, in order.
    pub decisions: Vec<Decision>,
}

/// Final result of one run invocation.
///
/// Failed runs still produce a report: summaries are present for whatever
/// ticks completed, and `error` carries the diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunReport {
    /// Run identifier.
    pub run_id: RunId,
    /// Requested strategy.
    pub strategy: Strategy,
    /// When the run was started.
    pub started_at: DateTime<Utc>,
    /// Why the run ended, if it got far enough to end.
    pub end_reason: Option<EndReason>,
    /// Number of ticks fully executed.
    pub total_ticks: u64,
    /// Adaptive session summary, if that session ran.
    pub adaptive: Option<RunSummary>,
    /// Fixed-time session summary, if that session ran.
    pub fixed: Option<RunSummary>,
    /// Comparison, present only when both sessions produced data.
    pub comparison: Option<Comparison>,
    /// Per-intersection controller statistics.
    pub controllers: Vec<ControllerReport>,
    /// Diagnostic for failed runs.
    pub error: Option<String>,
}

impl RunReport {
    /// An empty report for a run that has not produced any data.
    pub fn empty(run_id: RunId, strategy: Strategy, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            strategy,
            started_at,
            end_reason: None,
            total_ticks: 0,
            adaptive: None,
            fixed: None,
            comparison: None,
            controllers: Vec::new(),
            error: None,
        }
    }

    /// Whether the run produced no usable summary.
    pub const fn is_empty(&self) -> bool {
        self.adaptive.is_none() && self.fixed.is_none()
    }
}
