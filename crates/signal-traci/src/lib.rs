//! TraCI remote-control backend for the signal control engine.
//!
//! Implements the [`EngineSession`] and [`EngineLauncher`] capability
//! traits over the simulator's TCP protocol. Each session owns one
//! simulator process and one blocking connection to it.
//!
//! # Modules
//!
//! - [`codec`] -- Message framing, command headers, typed value decoding.
//! - [`client`] -- Blocking request/response client.
//! - [`constants`] -- Command, variable, and type ids.
//! - [`error`] -- [`TraciError`] and its mapping onto engine errors.
//! - [`launcher`] -- Binary discovery, command line, process start.
//! - [`session`] -- [`TraciSession`], the engine session implementation.
//!
//! [`EngineSession`]: signal_core::engine::EngineSession
//! [`EngineLauncher`]: signal_core::engine::EngineLauncher
//! [`TraciError`]: error::TraciError
//! [`TraciSession`]: session::TraciSession

pub mod client;
pub mod codec;
pub mod constants;
pub mod error;
pub mod launcher;
pub mod session;

pub use error::TraciError;
pub use launcher::TraciLauncher;
