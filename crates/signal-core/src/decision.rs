//! Decision sources for phase controllers.
//!
//! A phase controller consults its [`DecisionSource`] once per completed
//! green-plus-clearance window. The adaptive family asks the trained
//! policy ([`PolicySource`]); the fixed-time baseline cycles through the
//! actions in order ([`RoundRobinSource`]).

use std::sync::Arc;

use crate::encoder::StateVector;
use crate::policy::{Policy, PolicyError, argmax};

/// Errors produced while choosing an action.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// The policy failed to evaluate the state.
    #[error("policy evaluation failed: {source}")]
    Policy {
        /// The underlying policy error.
        #[from]
        source: PolicyError,
    },

    /// The policy produced a score vector that cannot be used.
    #[error("malformed policy output: {reason}")]
    MalformedOutput {
        /// What is wrong with the output.
        reason: String,
    },
}

/// A source of phase decisions.
pub trait DecisionSource: Send {
    /// Choose the next action index given the current state and action.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError`] if the source cannot produce a usable
    /// action. Callers fall back to round-robin for that cycle.
    fn choose(&mut self, state: &StateVector, current: usize) -> Result<usize, DecisionError>;
}

/// Adaptive decisions: argmax of the policy's scores.
pub struct PolicySource {
    policy: Arc<dyn Policy>,
    num_actions: usize,
}

impl std::fmt::Debug for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySource")
            .field("num_actions", &self.num_actions)
            .finish_non_exhaustive()
    }
}

impl PolicySource {
    /// Wrap a shared policy.
    pub fn new(policy: Arc<dyn Policy>, num_actions: usize) -> Self {
        Self {
            policy,
            num_actions,
        }
    }
}

impl DecisionSource for PolicySource {
    fn choose(&mut self, state: &StateVector, _current: usize) -> Result<usize, DecisionError> {
        let scores = self.policy.scores(&state.features())?;
        if scores.len() != self.num_actions {
            return Err(DecisionError::MalformedOutput {
                reason: format!(
                    "expected {} scores, got {}",
                    self.num_actions,
                    scores.len()
                ),
            });
        }
        argmax(&scores).ok_or_else(|| DecisionError::MalformedOutput {
            reason: "non-finite score".to_owned(),
        })
    }
}

/// Fixed-time decisions: the next action in cyclic order.
#[derive(Debug, Clone, Copy)]
pub struct RoundRobinSource {
    num_actions: usize,
}

impl RoundRobinSource {
    /// Cycle over `num_actions` actions.
    pub const fn new(num_actions: usize) -> Self {
        Self { num_actions }
    }

    /// Successor of `current` in cyclic order.
    pub fn next_after(&self, current: usize) -> usize {
        current
            .saturating_add(1)
            .checked_rem(self.num_actions)
            .unwrap_or(0)
    }
}

impl DecisionSource for RoundRobinSource {
    fn choose(&mut self, _state: &StateVector, current: usize) -> Result<usize, DecisionError> {
        Ok(self.next_after(current))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FixedScores(Vec<f32>);

    impl Policy for FixedScores {
        fn input_len(&self) -> usize {
            4
        }
        fn output_len(&self) -> usize {
            self.0.len()
        }
        fn scores(&self, _features: &[f32]) -> Result<Vec<f32>, PolicyError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn round_robin_cycles() {
        let mut source = RoundRobinSource::new(4);
        let state = StateVector::zeros(4);
        let mut current = 0;
        let mut seen = Vec::new();
        for _ in 0..5 {
            current = source.choose(&state, current).unwrap();
            seen.push(current);
        }
        assert_eq!(seen, vec![1, 2, 3, 0, 1]);
    }

    #[test]
    fn policy_argmax() {
        let mut source = PolicySource::new(Arc::new(FixedScores(vec![0.1, 0.2, 0.9, 0.3])), 4);
        assert_eq!(source.choose(&StateVector::zeros(4), 0).unwrap(), 2);
    }

    #[test]
    fn malformed_output_is_an_error() {
        let mut short = PolicySource::new(Arc::new(FixedScores(vec![1.0, 2.0])), 4);
        assert!(matches!(
            short.choose(&StateVector::zeros(4), 0),
            Err(DecisionError::MalformedOutput { .. })
        ));

        let mut nan = PolicySource::new(Arc::new(FixedScores(vec![1.0, f32::NAN, 0.0, 0.0])), 4);
        assert!(nan.choose(&StateVector::zeros(4), 0).is_err());
    }
}
