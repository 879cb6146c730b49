//! Trained policy that maps an occupancy state to action scores.
//!
//! The [`Policy`] trait is the only thing the adaptive controller knows
//! about the model. [`MlpPolicy`] is a small dense feed-forward network
//! loaded from JSON weights exported by the training pipeline:
//!
//! ```json
//! {
//!   "layers": [
//!     { "weights": [[...], ...], "bias": [...], "activation": "relu" },
//!     { "weights": [[...], ...], "bias": [...], "activation": "linear" }
//!   ]
//! }
//! ```
//!
//! Each `weights` matrix is `outputs x inputs`. Policies are immutable
//! once loaded and shared between controllers behind an `Arc`.

use std::path::Path;

use serde::Deserialize;

/// Errors loading or evaluating a policy.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Failed to read the weights file.
    #[error("failed to read policy weights: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The weights file is not valid JSON for the expected layout.
    #[error("failed to parse policy weights: {source}")]
    Parse {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// Layer dimensions do not chain together.
    #[error("invalid policy shape: {reason}")]
    Shape {
        /// What is wrong with the shape.
        reason: String,
    },

    /// The input vector does not match the network's input width.
    #[error("policy expects {expected} inputs, got {actual}")]
    InputLength {
        /// Network input width.
        expected: usize,
        /// Supplied input length.
        actual: usize,
    },
}

/// A scoring policy over occupancy states.
pub trait Policy: Send + Sync {
    /// Expected input length.
    fn input_len(&self) -> usize;

    /// Number of scores produced per input.
    fn output_len(&self) -> usize;

    /// Score every action for the given state features.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InputLength`] if `features` has the wrong
    /// length.
    fn scores(&self, features: &[f32]) -> Result<Vec<f32>, PolicyError>;
}

/// Activation applied after a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// `max(0, x)`.
    Relu,
    /// Identity.
    Linear,
}

#[derive(Debug, Clone, Deserialize)]
struct LayerSpec {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    #[serde(default = "default_activation")]
    activation: Activation,
}

const fn default_activation() -> Activation {
    Activation::Linear
}

#[derive(Debug, Clone, Deserialize)]
struct NetworkSpec {
    layers: Vec<LayerSpec>,
}

/// One fully connected layer.
#[derive(Debug, Clone)]
struct Dense {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    activation: Activation,
}

impl Dense {
    fn inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| {
                let sum = row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + bias;
                match self.activation {
                    Activation::Relu => sum.max(0.0),
                    Activation::Linear => sum,
                }
            })
            .collect()
    }
}

/// Dense multilayer perceptron.
#[derive(Debug, Clone)]
pub struct MlpPolicy {
    layers: Vec<Dense>,
}

impl MlpPolicy {
    /// Load weights from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the file cannot be read, parsed, or has
    /// inconsistent layer shapes.
    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load weights from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] on malformed JSON or inconsistent shapes.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let spec: NetworkSpec = serde_json::from_str(json)?;
        if spec.layers.is_empty() {
            return Err(PolicyError::Shape {
                reason: "network has no layers".to_owned(),
            });
        }

        let mut layers = Vec::with_capacity(spec.layers.len());
        let mut width: Option<usize> = None;
        for (index, layer) in spec.layers.into_iter().enumerate() {
            let outputs = layer.weights.len();
            if outputs == 0 || layer.bias.len() != outputs {
                return Err(PolicyError::Shape {
                    reason: format!(
                        "layer {index}: {outputs} weight rows but {} biases",
                        layer.bias.len()
                    ),
                });
            }
            let inputs = layer.weights.first().map_or(0, Vec::len);
            if inputs == 0 || layer.weights.iter().any(|row| row.len() != inputs) {
                return Err(PolicyError::Shape {
                    reason: format!("layer {index}: ragged or empty weight rows"),
                });
            }
            if let Some(previous) = width
                && previous != inputs
            {
                return Err(PolicyError::Shape {
                    reason: format!("layer {index}: expects {inputs} inputs, previous layer emits {previous}"),
                });
            }
            width = Some(outputs);
            layers.push(Dense {
                weights: layer.weights,
                bias: layer.bias,
                activation: layer.activation,
            });
        }
        Ok(Self { layers })
    }
}

impl Policy for MlpPolicy {
    fn input_len(&self) -> usize {
        self.layers.first().map_or(0, Dense::inputs)
    }

    fn output_len(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.bias.len())
    }

    fn scores(&self, features: &[f32]) -> Result<Vec<f32>, PolicyError> {
        let expected = self.input_len();
        if features.len() != expected {
            return Err(PolicyError::InputLength {
                expected,
                actual: features.len(),
            });
        }
        let mut activations = features.to_vec();
        for layer in &self.layers {
            activations = layer.forward(&activations);
        }
        Ok(activations)
    }
}

/// Index of the highest score; ties go to the lowest index.
///
/// Returns `None` for an empty slice or if any score is not finite.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    if scores.iter().any(|s| !s.is_finite()) {
        return None;
    }
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((index, score)),
        }
    }
    best.map(|(index, _)| index)
}
