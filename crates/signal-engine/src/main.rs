//! Signal engine binary: runs the adaptive and fixed-time controllers
//! against the simulator and reports the comparison.
//!
//! # Usage
//!
//! ```text
//! signal-engine [adaptive|fixed|both] [config.yaml]
//! ```
//!
//! Defaults to `both` and `signal-config.yaml` in the working directory.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (defaults when the file is absent)
//! 2. Initialize structured logging (tracing)
//! 3. Load and shape-check the policy when the strategy includes the
//!    adaptive controller
//! 4. Select the engine backend (TraCI or synthetic)
//! 5. Build the orchestrator and control surface
//! 6. Start the outbound drain task
//! 7. Start the run; Ctrl-C requests a stop at the next tick boundary
//! 8. Flush remaining records and print the final report

mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use signal_core::config::{
    ControlConfig, DemandConfig, EngineBackend, LoggingConfig, SignalConfig,
};
use signal_core::control::{ControlSurface, StartAck};
use signal_core::demand::{DemandSource, RouteFileGenerator, StaticRoutes};
use signal_core::engine::EngineLauncher;
use signal_core::orchestrator::{DualOrchestrator, RunPlan};
use signal_core::outbound::OutboundQueue;
use signal_core::policy::{MlpPolicy, Policy};
use signal_core::synthetic::SyntheticLauncher;
use signal_traci::TraciLauncher;
use signal_types::{ControllerKind, EndReason, RunReport, Strategy};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG: &str = "signal-config.yaml";

/// Most records emitted per drain pass.
const DRAIN_BATCH: usize = 256;

/// Application entry point for the signal engine.
///
/// # Errors
///
/// Returns an error if startup fails or the run ends with a failure.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (strategy, config_path) = parse_args(std::env::args().skip(1))?;
    let config = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        config = %config_path.display(),
        strategy = ?strategy,
        backend = ?config.engine.backend,
        max_ticks = config.simulation.max_ticks,
        "signal-engine starting"
    );

    // 3. Load the policy.
    let policy = load_policy(&config, strategy)?;

    // 4. Select the engine backend.
    let launcher: Box<dyn EngineLauncher> = match config.engine.backend {
        EngineBackend::Traci => Box::new(TraciLauncher::new(config.engine.clone())),
        EngineBackend::Synthetic => {
            info!(
                intersections = config.engine.synthetic.intersections,
                arrival_rate = config.engine.synthetic.arrival_rate,
                "Using synthetic engine"
            );
            Box::new(SyntheticLauncher::from_config(&config.engine.synthetic))
        }
    };

    // 5. Build the orchestrator and control surface.
    let demand = demand_source(&config.demand, config.simulation.max_ticks);
    let outbound = Arc::new(OutboundQueue::new(config.outbound.capacity));
    let mut orchestrator = DualOrchestrator::new(
        RunPlan::from_config(&config.simulation),
        launcher,
        demand,
    )
    .with_seeds(config.demand.seed, config.engine.seed)
    .with_outbound(Arc::clone(&outbound));
    if let Some(policy) = policy {
        orchestrator = orchestrator.with_policy(policy);
    }
    let surface = Arc::new(ControlSurface::new(orchestrator));

    // 6. Start the drain task.
    let drain_interval = Duration::from_millis(config.outbound.drain_interval_ms.max(1));
    let drain = tokio::spawn(drain_records(Arc::clone(&outbound), drain_interval));

    // 7. Run until finished or interrupted.
    match surface.start(strategy) {
        StartAck::Started { run_id } => info!(run_id = %run_id, "Run accepted"),
        StartAck::AlreadyRunning => {
            return Err(AppError::Start {
                reason: "a run is already executing".to_owned(),
            }
            .into());
        }
        StartAck::Rejected { reason } => return Err(AppError::Start { reason }.into()),
    }
    let report = wait_for_report(Arc::clone(&surface)).await?;

    // 8. Flush and report.
    drain.abort();
    emit(outbound.drain(usize::MAX));
    if outbound.dropped() > 0 {
        warn!(dropped = outbound.dropped(), "Outbound records were dropped");
    }

    let Some(report) = report else {
        return Err(AppError::Run {
            message: "run produced no report".to_owned(),
        }
        .into());
    };
    println!("{}", serde_json::to_string_pretty(&report).map_err(AppError::from)?);
    log_run_end(&report);

    if report.end_reason == Some(EndReason::Failed) {
        return Err(AppError::Run {
            message: report.error.unwrap_or_default(),
        }
        .into());
    }
    Ok(())
}

/// Parse `[strategy] [config path]`.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<(Strategy, PathBuf), AppError> {
    let strategy = match args.next() {
        Some(arg) => arg
            .parse::<Strategy>()
            .map_err(|message| AppError::Usage { message })?,
        None => Strategy::Both,
    };
    let config = args.next().map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    if let Some(extra) = args.next() {
        return Err(AppError::Usage {
            message: format!("unexpected argument '{extra}'"),
        });
    }
    Ok((strategy, config))
}

/// Load configuration, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> Result<SignalConfig, AppError> {
    if path.exists() {
        Ok(SignalConfig::from_file(path)?)
    } else {
        // Logging is not up yet.
        eprintln!("config file {} not found, using defaults", path.display());
        Ok(SignalConfig::parse("")?)
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the policy if the strategy runs the adaptive controller.
fn load_policy(
    config: &SignalConfig,
    strategy: Strategy,
) -> Result<Option<Arc<dyn Policy>>, AppError> {
    if !strategy.controllers().contains(&ControllerKind::Adaptive) {
        return Ok(None);
    }
    let path = config
        .policy
        .weights_path
        .as_deref()
        .ok_or_else(|| AppError::MissingPolicy {
            strategy: format!("{strategy:?}").to_lowercase(),
        })?;
    let policy = MlpPolicy::from_file(path)?;
    info!(
        path = %path.display(),
        inputs = policy.input_len(),
        outputs = policy.output_len(),
        "Policy loaded"
    );
    check_policy_shape(&policy, &config.simulation)?;
    Ok(Some(Arc::new(policy)))
}

/// Reject a policy that cannot score the configured state.
fn check_policy_shape(policy: &dyn Policy, simulation: &ControlConfig) -> Result<(), AppError> {
    if policy.input_len() == simulation.num_states && policy.output_len() == simulation.num_actions
    {
        return Ok(());
    }
    Err(AppError::PolicyShape {
        inputs: policy.input_len(),
        outputs: policy.output_len(),
        num_states: simulation.num_states,
        num_actions: simulation.num_actions,
    })
}

/// Pre-made route file when configured, otherwise seeded generation.
fn demand_source(demand: &DemandConfig, max_ticks: u64) -> Box<dyn DemandSource> {
    match &demand.static_route_file {
        Some(path) => {
            info!(path = %path.display(), "Using static route file");
            Box::new(StaticRoutes::new(path.clone()))
        }
        None => Box::new(RouteFileGenerator::new(demand, max_ticks)),
    }
}

/// Block on the run in a worker thread; Ctrl-C requests a stop.
async fn wait_for_report(surface: Arc<ControlSurface>) -> Result<Option<RunReport>, AppError> {
    let waiter_surface = Arc::clone(&surface);
    let mut waiter = tokio::task::spawn_blocking(move || waiter_surface.wait());

    let joined = tokio::select! {
        joined = &mut waiter => joined,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    info!(tick = surface.current_tick(), "Interrupt received, stopping run");
                    surface.stop();
                }
                Err(err) => warn!(error = %err, "Failed to listen for interrupts"),
            }
            waiter.await
        }
    };
    joined.map_err(|err| AppError::Join {
        message: err.to_string(),
    })
}

/// Periodically move queued records to stdout as JSON lines.
async fn drain_records(outbound: Arc<OutboundQueue>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        emit(outbound.drain(DRAIN_BATCH));
    }
}

fn emit(records: Vec<signal_types::MetricsRecord>) {
    for record in records {
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, tick = record.tick(), "Failed to encode record"),
        }
    }
}

fn log_run_end(report: &RunReport) {
    info!(
        run_id = %report.run_id,
        end_reason = ?report.end_reason,
        total_ticks = report.total_ticks,
        "signal-engine run finished"
    );
    if let Some(comparison) = &report.comparison {
        info!(
            waiting_time_reduction = comparison.improvement.waiting_time_reduction,
            queue_length_reduction = comparison.improvement.queue_length_reduction,
            throughput_increase = comparison.improvement.throughput_increase,
            "Adaptive vs fixed-time improvement (%)"
        );
    }
}
