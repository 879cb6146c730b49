//! Mapping from signal actions to phase codes.
//!
//! Every action owns a green code and the clearance code that follows it
//! (0/1, 2/3, 4/5, 6/7). Real signal programs sometimes have fewer phases
//! than the canonical eight; codes at or beyond the program's phase count
//! wrap modulo that count so the engine never receives an invalid index.

use signal_types::SignalAction;

/// Errors building a phase table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhaseTableError {
    /// The signal program has no phases.
    #[error("signal program has no phases")]
    NoPhases,

    /// The action count is outside the supported range.
    #[error("unsupported action count {num_actions} (expected 1..=4)")]
    ActionCount {
        /// Requested action count.
        num_actions: usize,
    },
}

/// Green and clearance codes for one action, already resolved against the
/// signal program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePair {
    /// Code commanded while the action is held.
    pub green: usize,
    /// Code commanded while leaving the action.
    pub clearance: usize,
}

/// Resolved phase codes for every action at one intersection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTable {
    pairs: Vec<PhasePair>,
    phase_count: usize,
}

impl PhaseTable {
    /// Build the table for `num_actions` actions against a program with
    /// `phase_count` phases.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseTableError`] if `phase_count` is zero or `num_actions`
    /// is not in `1..=4`.
    pub fn new(num_actions: usize, phase_count: usize) -> Result<Self, PhaseTableError> {
        if phase_count == 0 {
            return Err(PhaseTableError::NoPhases);
        }
        if num_actions == 0 || num_actions > SignalAction::ALL.len() {
            return Err(PhaseTableError::ActionCount { num_actions });
        }
        let pairs = SignalAction::ALL
            .iter()
            .take(num_actions)
            .map(|action| PhasePair {
                green: resolve(action.green_code(), phase_count),
                clearance: resolve(action.clearance_code(), phase_count),
            })
            .collect();
        Ok(Self { pairs, phase_count })
    }

    /// Phase codes for an action index, if it is in range.
    pub fn pair(&self, action: usize) -> Option<PhasePair> {
        self.pairs.get(action).copied()
    }

    /// Number of actions in the table.
    pub fn num_actions(&self) -> usize {
        self.pairs.len()
    }

    /// Phase count of the signal program.
    pub const fn phase_count(&self) -> usize {
        self.phase_count
    }
}

/// Wrap a canonical code into `[0, phase_count)`.
fn resolve(code: usize, phase_count: usize) -> usize {
    if code < phase_count {
        code
    } else {
        code.checked_rem(phase_count).unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn full_program_keeps_canonical_codes() {
        let table = PhaseTable::new(4, 8).unwrap();
        for action in SignalAction::ALL {
            let pair = table.pair(action.index()).unwrap();
            assert_eq!(pair.green, action.green_code());
            assert_eq!(pair.clearance, action.clearance_code());
        }
    }

    #[test]
    fn short_program_wraps() {
        let table = PhaseTable::new(4, 4).unwrap();
        let ew = table.pair(2).unwrap();
        assert_eq!(ew.green, 0);
        assert_eq!(ew.clearance, 1);
        let ew_left = table.pair(3).unwrap();
        assert_eq!(ew_left.green, 2);
        assert_eq!(ew_left.clearance, 3);

        let tiny = PhaseTable::new(4, 3).unwrap();
        for action in 0..4 {
            let pair = tiny.pair(action).unwrap();
            assert!(pair.green < 3);
            assert!(pair.clearance < 3);
        }
    }

    #[test]
    fn invalid_inputs_rejected() {
        assert_eq!(PhaseTable::new(4, 0), Err(PhaseTableError::NoPhases));
        assert_eq!(
            PhaseTable::new(5, 8),
            Err(PhaseTableError::ActionCount { num_actions: 5 })
        );
        assert!(PhaseTable::new(0, 8).is_err());
    }

    #[test]
    fn out_of_range_action_has_no_pair() {
        let table = PhaseTable::new(2, 8).unwrap();
        assert_eq!(table.num_actions(), 2);
        assert!(table.pair(2).is_none());
    }
}
