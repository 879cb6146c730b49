//! Occupancy state encoding for one intersection.
//!
//! Each controlled lane is classified into a [`LaneGroup`] (approach plus
//! movement) and every vehicle on it is dropped into one of ten distance
//! buckets measured back from the stop line. The state vector marks
//! `group * 10 + bucket` as occupied.
//!
//! Observation gathering and encoding are split: [`observe`] pulls raw
//! lane/vehicle data through the [`EngineLink`], and [`StateEncoder::encode`]
//! is a pure function over those observations.

use signal_types::{Approach, LaneGroup, LaneId, TurnKind};
use tracing::debug;

use crate::bridge::EngineLink;

/// Upper bounds (exclusive) of the first nine distance buckets, in metres.
/// Anything at or beyond the last bound lands in bucket 9.
pub const DISTANCE_BOUNDS: [f64; 9] = [7.0, 14.0, 21.0, 28.0, 40.0, 60.0, 100.0, 160.0, 400.0];

/// Number of distance buckets per lane group.
pub const BUCKETS_PER_GROUP: usize = 10;

/// Quantized distance-to-stop-line category in `[0, 10)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DistanceBucket(u8);

impl DistanceBucket {
    /// Bucket for a distance to the stop line.
    ///
    /// Negative or NaN distances land in the nearest bucket.
    pub fn from_distance(distance: f64) -> Self {
        let mut bucket: u8 = 0;
        for bound in DISTANCE_BOUNDS {
            if distance < bound || distance.is_nan() {
                return Self(bucket);
            }
            bucket = bucket.saturating_add(1);
        }
        Self(bucket)
    }

    /// Bucket index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// State vector position for a vehicle in `bucket` on a lane of `group`.
///
/// The canonical zero group composes to the bare bucket index.
pub const fn compose_index(group: LaneGroup, bucket: DistanceBucket) -> usize {
    let group = group.index() as usize;
    // group < 8 and bucket < 10, so this stays far below usize::MAX.
    group
        .saturating_mul(BUCKETS_PER_GROUP)
        .saturating_add(bucket.index())
}

/// Classify a lane from its geometry and position on its edge.
///
/// The approach comes from the bearing of the lane's terminal segment. A
/// lane is a left-turn lane iff it has the highest index on its edge and
/// the edge has more than one lane. Returns `None` when the geometry has
/// fewer than two points or the lane index is unknown.
///
/// Dual left-turn lanes are not recognized: only the outermost lane on an
/// edge is ever classified as a left-turn lane.
pub fn classify_lane(
    shape: &[(f64, f64)],
    lane_index: Option<u32>,
    edge_lanes: u32,
) -> Option<LaneGroup> {
    let [.., (x1, y1), (x2, y2)] = shape else {
        return None;
    };
    let bearing = (y2 - y1).atan2(x2 - x1).to_degrees();
    let approach = Approach::from_bearing(bearing);

    let index = lane_index?;
    let is_left = edge_lanes > 1 && index.saturating_add(1) == edge_lanes;
    let turn = if is_left {
        TurnKind::Left
    } else {
        TurnKind::Through
    };
    Some(LaneGroup { approach, turn })
}

/// Fixed-length binary occupancy vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVector {
    cells: Vec<u8>,
}

impl StateVector {
    /// An all-zero vector of the given length.
    pub fn zeros(len: usize) -> Self {
        Self {
            cells: vec![0; len],
        }
    }

    /// Mark a cell occupied. Returns `false` (and writes nothing) when the
    /// index is out of range.
    pub fn mark(&mut self, index: usize) -> bool {
        match self.cells.get_mut(index) {
            Some(cell) => {
                *cell = 1;
                true
            }
            None => false,
        }
    }

    /// Vector length.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the vector has zero length.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|&&c| c != 0).count()
    }

    /// Raw cells.
    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }

    /// Cells as policy input features.
    pub fn features(&self) -> Vec<f32> {
        self.cells.iter().map(|&c| f32::from(c)).collect()
    }
}

/// One vehicle seen on a controlled lane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleObservation {
    /// Distance to the stop line in metres.
    pub distance: f64,
    /// Accumulated waiting time in seconds.
    pub waiting_time: f64,
}

/// Everything observed on one controlled lane this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneObservation {
    /// Lane observed.
    pub lane: LaneId,
    /// Lane group, if the lane could be classified.
    pub group: Option<LaneGroup>,
    /// Vehicles on the lane.
    pub vehicles: Vec<VehicleObservation>,
    /// Halted vehicles on the lane.
    pub halted: u32,
    /// A query failed; the lane contributes nothing to the state vector.
    pub degraded: bool,
}

/// Pull one tick's observations for the given lanes.
///
/// Never fails: query errors mark the affected lane as degraded.
pub fn observe(link: &mut EngineLink, lanes: &[LaneId]) -> Vec<LaneObservation> {
    lanes.iter().map(|lane| observe_lane(link, lane)).collect()
}

fn observe_lane(link: &mut EngineLink, lane: &LaneId) -> LaneObservation {
    let group = link.lane_group(lane);
    let halted = link.halted_count(lane).value_or_default();

    let Some(vehicle_ids) = link.lane_vehicles(lane).value() else {
        return LaneObservation {
            lane: lane.clone(),
            group,
            vehicles: Vec::new(),
            halted,
            degraded: true,
        };
    };

    let mut degraded = false;
    let mut vehicles = Vec::with_capacity(vehicle_ids.len());
    for vehicle in &vehicle_ids {
        let Some(distance) = link.vehicle_distance(lane, vehicle).value() else {
            degraded = true;
            continue;
        };
        let waiting_time = link.vehicle_waiting_time(vehicle).value_or_default();
        vehicles.push(VehicleObservation {
            distance,
            waiting_time,
        });
    }

    LaneObservation {
        lane: lane.clone(),
        group,
        vehicles,
        halted,
        degraded,
    }
}

/// Builds fixed-length state vectors from lane observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateEncoder {
    num_states: usize,
}

impl StateEncoder {
    /// Encoder producing vectors of length `num_states`.
    pub const fn new(num_states: usize) -> Self {
        Self { num_states }
    }

    /// State vector length.
    pub const fn num_states(&self) -> usize {
        self.num_states
    }

    /// Encode observations into an occupancy vector.
    ///
    /// Degraded or unclassified lanes contribute nothing. Compositions that
    /// fall outside the vector are dropped.
    pub fn encode(&self, observations: &[LaneObservation]) -> StateVector {
        let mut state = StateVector::zeros(self.num_states);
        for obs in observations {
            let Some(group) = obs.group else {
                continue;
            };
            if obs.degraded {
                continue;
            }
            for vehicle in &obs.vehicles {
                let index = compose_index(group, DistanceBucket::from_distance(vehicle.distance));
                if !state.mark(index) {
                    debug!(lane = %obs.lane, index, "Dropped out-of-range state index");
                }
            }
        }
        state
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn obs(group: LaneGroup, distances: &[f64]) -> LaneObservation {
        LaneObservation {
            lane: LaneId::from("L_0"),
            group: Some(group),
            vehicles: distances
                .iter()
                .map(|&distance| VehicleObservation {
                    distance,
                    waiting_time: 0.0,
                })
                .collect(),
            halted: 0,
            degraded: false,
        }
    }

    const WEST_THROUGH: LaneGroup = LaneGroup {
        approach: Approach::West,
        turn: TurnKind::Through,
    };
    const SOUTH_LEFT: LaneGroup = LaneGroup {
        approach: Approach::South,
        turn: TurnKind::Left,
    };

    #[test]
    fn bucket_boundaries() {
        assert_eq!(DistanceBucket::from_distance(0.0).index(), 0);
        assert_eq!(DistanceBucket::from_distance(6.99).index(), 0);
        assert_eq!(DistanceBucket::from_distance(7.0).index(), 1);
        assert_eq!(DistanceBucket::from_distance(27.9).index(), 3);
        assert_eq!(DistanceBucket::from_distance(28.0).index(), 4);
        assert_eq!(DistanceBucket::from_distance(99.0).index(), 6);
        assert_eq!(DistanceBucket::from_distance(399.0).index(), 8);
        assert_eq!(DistanceBucket::from_distance(400.0).index(), 9);
        assert_eq!(DistanceBucket::from_distance(1e9).index(), 9);
        assert_eq!(DistanceBucket::from_distance(-3.0).index(), 0);
    }

    #[test]
    fn every_composition_in_bounds_or_dropped() {
        for len in [0_usize, 1, 35, 79, 80] {
            let encoder = StateEncoder::new(len);
            for approach in [Approach::West, Approach::North, Approach::East, Approach::South] {
                for turn in [TurnKind::Through, TurnKind::Left] {
                    for bound in [0.0, 10.0, 30.0, 50.0, 90.0, 150.0, 300.0, 500.0] {
                        let group = LaneGroup { approach, turn };
                        let state = encoder.encode(&[obs(group, &[bound])]);
                        assert_eq!(state.len(), len);
                        let index = compose_index(group, DistanceBucket::from_distance(bound));
                        let expected = usize::from(index < len);
                        assert_eq!(state.occupied(), expected);
                    }
                }
            }
        }
    }

    #[test]
    fn zero_group_composes_to_bucket() {
        let state = StateEncoder::new(80).encode(&[obs(WEST_THROUGH, &[3.0, 50.0])]);
        assert_eq!(state.as_slice()[0], 1);
        assert_eq!(state.as_slice()[5], 1);
        assert_eq!(state.occupied(), 2);
    }

    #[test]
    fn non_zero_group_composes_tens() {
        let state = StateEncoder::new(80).encode(&[obs(SOUTH_LEFT, &[500.0])]);
        assert_eq!(state.as_slice()[79], 1);
        assert_eq!(state.occupied(), 1);
    }

    #[test]
    fn degraded_lane_contributes_nothing() {
        let mut lane = obs(WEST_THROUGH, &[1.0, 2.0]);
        lane.degraded = true;
        let state = StateEncoder::new(80).encode(&[lane]);
        assert_eq!(state.occupied(), 0);
    }

    #[test]
    fn unclassified_lane_contributes_nothing() {
        let mut lane = obs(WEST_THROUGH, &[1.0]);
        lane.group = None;
        assert_eq!(StateEncoder::new(80).encode(&[lane]).occupied(), 0);
    }

    #[test]
    fn left_turn_requires_highest_index_on_multi_lane_edge() {
        let eastbound = [(-100.0, 0.0), (-10.0, 0.0), (0.0, 0.0)];

        let left = classify_lane(&eastbound, Some(2), 3).unwrap();
        assert_eq!(left.turn, TurnKind::Left);
        assert_eq!(left.approach, Approach::West);

        let middle = classify_lane(&eastbound, Some(1), 3).unwrap();
        assert_eq!(middle.turn, TurnKind::Through);

        // A single-lane edge never yields a left-turn lane.
        let single = classify_lane(&eastbound, Some(0), 1).unwrap();
        assert_eq!(single.turn, TurnKind::Through);
    }

    #[test]
    fn approach_from_terminal_segment() {
        // Curves north first, then heads south into the stop line.
        let shape = [(0.0, 0.0), (0.0, 50.0), (0.0, 40.0)];
        let group = classify_lane(&shape, Some(0), 2).unwrap();
        assert_eq!(group.approach, Approach::North);
        assert_eq!(group.index(), 2);

        let westbound = [(100.0, 0.0), (0.0, 0.0)];
        assert_eq!(
            classify_lane(&westbound, Some(0), 2).unwrap().approach,
            Approach::East
        );
    }

    #[test]
    fn short_geometry_or_missing_index_unclassified() {
        assert!(classify_lane(&[(0.0, 0.0)], Some(0), 2).is_none());
        assert!(classify_lane(&[], Some(0), 2).is_none());
        assert!(classify_lane(&[(0.0, 0.0), (1.0, 0.0)], None, 2).is_none());
    }

    #[test]
    fn features_mirror_cells() {
        let mut state = StateVector::zeros(4);
        assert!(state.mark(2));
        assert!(!state.mark(4));
        assert_eq!(state.features(), vec![0.0, 0.0, 1.0, 0.0]);
    }
}
