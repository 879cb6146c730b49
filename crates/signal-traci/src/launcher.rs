//! Simulator process launch and binary discovery.
//!
//! Each session gets its own simulator process listening on a free local
//! port. The binary is taken from config when set, otherwise searched for
//! on `PATH`, then under `$SUMO_HOME/bin`, then in common install
//! locations. When nothing is found the bare executable name is used and
//! the spawn error surfaces at launch.

use std::ffi::OsString;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use signal_core::config::EngineConfig;
use signal_core::engine::{EngineError, EngineLauncher, EngineSession, SessionSpec};
use tracing::{debug, info, warn};

use crate::client::TraciClient;
use crate::session::{TraciSession, terminate};

/// Where to look for the simulator binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPaths {
    /// Value of `PATH`.
    pub path: Option<OsString>,
    /// Value of `SUMO_HOME`.
    pub sumo_home: Option<PathBuf>,
    /// Platform install locations, searched last.
    pub common: Vec<PathBuf>,
}

impl SearchPaths {
    /// Search paths from the process environment.
    pub fn from_env() -> Self {
        Self {
            path: std::env::var_os("PATH"),
            sumo_home: std::env::var_os("SUMO_HOME").map(PathBuf::from),
            common: common_install_dirs(),
        }
    }
}

fn common_install_dirs() -> Vec<PathBuf> {
    let dirs: &[&str] = if cfg!(windows) {
        &[
            r"C:\Program Files (x86)\Eclipse\Sumo\bin",
            r"C:\Program Files\Eclipse\Sumo\bin",
            r"C:\Sumo\bin",
        ]
    } else {
        &[
            "/usr/bin",
            "/usr/local/bin",
            "/usr/share/sumo/bin",
            "/opt/homebrew/bin",
        ]
    };
    dirs.iter().map(PathBuf::from).collect()
}

/// Executable file name for the command-line or GUI simulator.
pub fn executable_name(gui: bool) -> String {
    let base = if gui { "sumo-gui" } else { "sumo" };
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_owned()
    }
}

/// Resolve the simulator binary.
pub fn discover_binary(configured: Option<&str>, gui: bool, search: &SearchPaths) -> PathBuf {
    if let Some(binary) = configured {
        return PathBuf::from(binary);
    }

    let name = executable_name(gui);
    let path_dirs = search
        .path
        .as_ref()
        .map(|path| std::env::split_paths(path).collect::<Vec<_>>())
        .unwrap_or_default();
    let home_dir = search.sumo_home.as_ref().map(|home| home.join("bin"));

    path_dirs
        .iter()
        .chain(home_dir.iter())
        .chain(search.common.iter())
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| {
            warn!(binary = %name, "Simulator binary not found, relying on the bare name");
            PathBuf::from(name)
        })
}

/// Simulator command line for one session.
pub fn command_args(config: &EngineConfig, spec: &SessionSpec, port: u16) -> Vec<String> {
    let mut args = vec![
        "-c".to_owned(),
        config.network_config.display().to_string(),
        "--route-files".to_owned(),
        spec.route_file.display().to_string(),
        "--no-step-log".to_owned(),
        "true".to_owned(),
        "--waiting-time-memory".to_owned(),
        config.waiting_time_memory.to_string(),
        "--time-to-teleport".to_owned(),
        config.time_to_teleport.to_string(),
        "--seed".to_owned(),
        spec.seed.to_string(),
        "--start".to_owned(),
        "--remote-port".to_owned(),
        port.to_string(),
    ];
    args.extend(config.extra_args.iter().cloned());
    args
}

fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Starts one simulator process per session and connects to it.
#[derive(Debug)]
pub struct TraciLauncher {
    config: EngineConfig,
    binary: PathBuf,
}

impl TraciLauncher {
    /// Launcher for the given engine settings, discovering the binary from
    /// the environment.
    pub fn new(config: EngineConfig) -> Self {
        let binary = discover_binary(config.binary.as_deref(), config.gui, &SearchPaths::from_env());
        info!(binary = %binary.display(), gui = config.gui, "Simulator binary selected");
        Self { config, binary }
    }

    /// Binary that will be started.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Poll the port until the simulator accepts, or give up if the
    /// process exits first.
    fn wait_for_port(&self, child: &mut Child, port: u16) -> Result<TcpStream, String> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let attempts = self.config.connect_retries.max(1);
        let delay = Duration::from_millis(self.config.connect_retry_delay_ms);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match child.try_wait() {
                Ok(Some(status)) => return Err(format!("simulator exited early ({status})")),
                Ok(None) => {}
                Err(err) => return Err(format!("cannot poll simulator: {err}")),
            }
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    debug!(attempt, port, error = %err, "Simulator not accepting yet");
                    last_error = err.to_string();
                    std::thread::sleep(delay);
                }
            }
        }
        Err(format!(
            "no connection on port {port} after {attempts} attempts: {last_error}"
        ))
    }

    fn connect(&self, child: &mut Child, port: u16, label: &str) -> Result<TraciClient, String> {
        let stream = self.wait_for_port(child, port)?;
        let mut client = TraciClient::new(stream, label).map_err(|err| err.to_string())?;
        let (api, version) = client.version().map_err(|err| err.to_string())?;
        info!(label, api, version = %version, port, "Connected to simulator");
        Ok(client)
    }
}

impl EngineLauncher for TraciLauncher {
    fn launch(&mut self, spec: &SessionSpec) -> Result<Box<dyn EngineSession>, EngineError> {
        let launch_error = |message: String| EngineError::Launch {
            label: spec.label.clone(),
            message,
        };

        let port = free_port().map_err(|err| launch_error(format!("no free port: {err}")))?;
        let args = command_args(&self.config, spec, port);
        debug!(label = %spec.label, binary = %self.binary.display(), ?args, "Starting simulator");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|err| {
                launch_error(format!("cannot start {}: {err}", self.binary.display()))
            })?;

        match self.connect(&mut child, port, &spec.label) {
            Ok(client) => Ok(Box::new(TraciSession::new(&spec.label, client, Some(child)))),
            Err(message) => {
                terminate(&spec.label, &mut child);
                Err(launch_error(message))
            }
        }
    }
}
