//! Error types for the signal engine binary.
//!
//! [`AppError`] is the top-level error type that wraps every failure mode
//! during startup and run reporting.

/// Top-level error for the signal engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: signal_core::config::ConfigError,
    },

    /// Policy weights could not be loaded.
    #[error("policy error: {source}")]
    Policy {
        /// The underlying policy error.
        #[from]
        source: signal_core::policy::PolicyError,
    },

    /// The requested strategy needs a policy but none is configured.
    #[error("strategy '{strategy}' needs policy.weights_path (or SIGNAL_POLICY_PATH)")]
    MissingPolicy {
        /// Requested strategy.
        strategy: String,
    },

    /// The policy's layer widths do not fit the configured state and
    /// action counts.
    #[error(
        "policy maps {inputs} inputs to {outputs} scores, but the run uses \
         {num_states} states and {num_actions} actions"
    )]
    PolicyShape {
        /// Policy input width.
        inputs: usize,
        /// Policy output width.
        outputs: usize,
        /// Configured state vector length.
        num_states: usize,
        /// Configured action count.
        num_actions: usize,
    },

    /// Command-line arguments are invalid.
    #[error("usage error: {message}")]
    Usage {
        /// What is wrong with the arguments.
        message: String,
    },

    /// The control surface refused to start the run.
    #[error("run not started: {reason}")]
    Start {
        /// Why the start was rejected.
        reason: String,
    },

    /// The background waiter task failed.
    #[error("control task failed: {message}")]
    Join {
        /// Description of the join failure.
        message: String,
    },

    /// Report serialization failed.
    #[error("failed to serialize report: {source}")]
    Json {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The run finished with a failure.
    #[error("run failed: {message}")]
    Run {
        /// Diagnostic from the run report.
        message: String,
    },
}
