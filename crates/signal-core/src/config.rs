//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `signal-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file.
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is out of its permitted range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SignalConfig {
    /// Simulation engine launch settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Control loop timing and run bounds.
    #[serde(default)]
    pub simulation: ControlConfig,

    /// Seeded demand generation.
    #[serde(default)]
    pub demand: DemandConfig,

    /// Trained policy location.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Outbound metrics queue.
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SignalConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `SIGNAL_ENGINE_BINARY` overrides `engine.binary`
    /// - `SIGNAL_POLICY_PATH` overrides `policy.weights_path`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override file values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SIGNAL_ENGINE_BINARY") {
            self.engine.binary = Some(val);
        }
        if let Ok(val) = std::env::var("SIGNAL_POLICY_PATH") {
            self.policy.weights_path = Some(PathBuf::from(val));
        }
    }

    /// Check cross-field and range constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.clearance_duration == 0 {
            return Err(invalid("simulation.clearance_duration must be at least 1"));
        }
        if sim.green_duration_adaptive == 0 || sim.green_duration_fixed == 0 {
            return Err(invalid("green durations must be at least 1"));
        }
        if sim.num_states == 0 {
            return Err(invalid("simulation.num_states must be at least 1"));
        }
        if sim.num_actions == 0 || sim.num_actions > 4 {
            return Err(invalid("simulation.num_actions must be between 1 and 4"));
        }
        if sim.series_stride == 0 {
            return Err(invalid("simulation.series_stride must be at least 1"));
        }
        if self.outbound.capacity == 0 {
            return Err(invalid("outbound.capacity must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.demand.straight_ratio) {
            return Err(invalid("demand.straight_ratio must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.engine.synthetic.arrival_rate) {
            return Err(invalid("engine.synthetic.arrival_rate must be within [0, 1]"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

/// Which engine implementation drives the sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineBackend {
    /// External simulator over the TraCI remote-control protocol.
    #[default]
    Traci,
    /// In-process synthetic engine (dry runs, demos).
    Synthetic,
}

/// Simulation engine launch settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Engine implementation.
    #[serde(default)]
    pub backend: EngineBackend,

    /// Explicit simulator binary; discovered from PATH / `SUMO_HOME` when absent.
    #[serde(default)]
    pub binary: Option<String>,

    /// Launch the GUI variant of the simulator.
    #[serde(default)]
    pub gui: bool,

    /// Simulator network configuration file.
    #[serde(default = "default_network_config")]
    pub network_config: PathBuf,

    /// Simulator random seed (shared by both sessions).
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Seconds of waiting time each vehicle remembers.
    #[serde(default = "default_waiting_time_memory")]
    pub waiting_time_memory: u32,

    /// Teleport threshold in seconds (-1 disables teleporting).
    #[serde(default = "default_time_to_teleport")]
    pub time_to_teleport: i32,

    /// Attempts to connect to a freshly launched simulator.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Delay between connection attempts in milliseconds.
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,

    /// Extra arguments appended to the simulator command line.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Settings for the synthetic backend.
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::default(),
            binary: None,
            gui: false,
            network_config: default_network_config(),
            seed: default_seed(),
            waiting_time_memory: default_waiting_time_memory(),
            time_to_teleport: default_time_to_teleport(),
            connect_retries: default_connect_retries(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            extra_args: Vec::new(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

/// Synthetic backend settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyntheticConfig {
    /// Number of four-way intersections in the synthetic network.
    #[serde(default = "default_synthetic_intersections")]
    pub intersections: u32,

    /// Per-lane probability of a vehicle arriving each tick.
    #[serde(default = "default_arrival_rate")]
    pub arrival_rate: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            intersections: default_synthetic_intersections(),
            arrival_rate: default_arrival_rate(),
        }
    }
}

/// Control loop timing and run bounds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlConfig {
    /// Ticks per run.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// State vector length.
    #[serde(default = "default_num_states")]
    pub num_states: usize,

    /// Number of policy actions (1 to 4).
    #[serde(default = "default_num_actions")]
    pub num_actions: usize,

    /// Green hold for the adaptive controller, in ticks.
    #[serde(default = "default_green_duration_adaptive")]
    pub green_duration_adaptive: u32,

    /// Green hold for the fixed-time controller, in ticks.
    #[serde(default = "default_green_duration_fixed")]
    pub green_duration_fixed: u32,

    /// Clearance (yellow) duration, in ticks.
    #[serde(default = "default_clearance_duration")]
    pub clearance_duration: u32,

    /// Log progress every N ticks (0 disables).
    #[serde(default = "default_progress_log_interval")]
    pub progress_log_interval: u64,

    /// Keep every Nth tick in the comparison time series.
    #[serde(default = "default_series_stride")]
    pub series_stride: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_ticks: default_max_ticks(),
            num_states: default_num_states(),
            num_actions: default_num_actions(),
            green_duration_adaptive: default_green_duration_adaptive(),
            green_duration_fixed: default_green_duration_fixed(),
            clearance_duration: default_clearance_duration(),
            progress_log_interval: default_progress_log_interval(),
            series_stride: default_series_stride(),
        }
    }
}

/// Seeded demand generation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DemandConfig {
    /// Vehicles generated per run.
    #[serde(default = "default_vehicles")]
    pub vehicles: u32,

    /// Demand seed; equal seeds produce byte-identical route files.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Where the generated route file is written.
    #[serde(default = "default_route_file")]
    pub route_file: PathBuf,

    /// Share of vehicles going straight through.
    #[serde(default = "default_straight_ratio")]
    pub straight_ratio: f64,

    /// Pre-made route file used as is instead of generating one.
    #[serde(default)]
    pub static_route_file: Option<PathBuf>,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            vehicles: default_vehicles(),
            seed: default_seed(),
            route_file: default_route_file(),
            straight_ratio: default_straight_ratio(),
            static_route_file: None,
        }
    }
}

/// Trained policy location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyConfig {
    /// JSON weight export of the trained network.
    #[serde(default)]
    pub weights_path: Option<PathBuf>,
}

/// Outbound metrics queue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutboundConfig {
    /// Records retained before the oldest unread one is dropped.
    #[serde(default = "default_outbound_capacity")]
    pub capacity: usize,

    /// Drain interval for the streaming consumer, in milliseconds.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            capacity: default_outbound_capacity(),
            drain_interval_ms: default_drain_interval_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_network_config() -> PathBuf {
    PathBuf::from("intersection/sumo_config.sumocfg")
}

const fn default_seed() -> u64 {
    42
}

const fn default_waiting_time_memory() -> u32 {
    10_000
}

const fn default_time_to_teleport() -> i32 {
    -1
}

const fn default_connect_retries() -> u32 {
    60
}

const fn default_connect_retry_delay_ms() -> u64 {
    100
}

const fn default_synthetic_intersections() -> u32 {
    1
}

const fn default_arrival_rate() -> f64 {
    0.12
}

const fn default_max_ticks() -> u64 {
    5400
}

const fn default_num_states() -> usize {
    80
}

const fn default_num_actions() -> usize {
    4
}

const fn default_green_duration_adaptive() -> u32 {
    10
}

const fn default_green_duration_fixed() -> u32 {
    30
}

const fn default_clearance_duration() -> u32 {
    4
}

const fn default_progress_log_interval() -> u64 {
    1000
}

const fn default_series_stride() -> usize {
    10
}

const fn default_vehicles() -> u32 {
    1000
}

fn default_route_file() -> PathBuf {
    PathBuf::from("intersection/episode_routes.rou.xml")
}

const fn default_straight_ratio() -> f64 {
    0.75
}

const fn default_outbound_capacity() -> usize {
    1024
}

const fn default_drain_interval_ms() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SignalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.simulation.max_ticks, 5400);
        assert_eq!(config.simulation.num_states, 80);
        assert_eq!(config.simulation.green_duration_adaptive, 10);
        assert_eq!(config.simulation.green_duration_fixed, 30);
        assert_eq!(config.simulation.clearance_duration, 4);
        assert_eq!(config.engine.backend, EngineBackend::Traci);
        assert_eq!(config.engine.time_to_teleport, -1);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
engine:
  backend: synthetic
  binary: "/opt/sumo/bin/sumo"
  gui: true
  network_config: "grid/sumo_config.sumocfg"
  seed: 7
  synthetic:
    intersections: 4
    arrival_rate: 0.3

simulation:
  max_ticks: 600
  num_states: 80
  num_actions: 4
  green_duration_adaptive: 12
  green_duration_fixed: 25
  clearance_duration: 3
  progress_log_interval: 100

demand:
  vehicles: 250
  seed: 11
  route_file: "grid/routes.rou.xml"
  straight_ratio: 0.6
  static_route_file: "grid/fixed.rou.xml"

policy:
  weights_path: "models/policy.json"

outbound:
  capacity: 64
  drain_interval_ms: 20

logging:
  level: "debug"
  json: true
"#;

        let config = SignalConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.engine.backend, EngineBackend::Synthetic);
        assert!(config.engine.gui);
        assert_eq!(config.engine.synthetic.intersections, 4);
        assert_eq!(config.simulation.max_ticks, 600);
        assert_eq!(config.simulation.clearance_duration, 3);
        assert_eq!(config.demand.vehicles, 250);
        assert_eq!(
            config.demand.static_route_file,
            Some(PathBuf::from("grid/fixed.rou.xml"))
        );
        assert_eq!(config.outbound.capacity, 64);
        assert!(config.logging.json);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = SignalConfig::parse("simulation:\n  max_ticks: 50\n");
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.simulation.max_ticks, 50);
        // Everything else uses defaults
        assert_eq!(config.simulation.num_actions, 4);
        assert_eq!(config.demand.vehicles, 1000);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(SignalConfig::parse("").is_ok());
    }

    #[test]
    fn zero_clearance_rejected() {
        let result = SignalConfig::parse("simulation:\n  clearance_duration: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn too_many_actions_rejected() {
        let result = SignalConfig::parse("simulation:\n  num_actions: 5\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn zero_capacity_rejected() {
        let result = SignalConfig::parse("outbound:\n  capacity: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("signal-config.yaml");
        if path.exists() {
            let config = SignalConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
