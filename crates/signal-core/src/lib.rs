//! Control core for comparing adaptive and fixed-time signal control.
//!
//! This crate owns everything between the simulation engine and the
//! reported results: occupancy state encoding, per-intersection phase
//! controllers, best-effort engine access, the dual-session run loop, and
//! metric aggregation.
//!
//! # Modules
//!
//! - [`bridge`] -- Best-effort engine queries ([`Probe`]) and the session
//!   bridge binding controllers to one engine session.
//! - [`config`] -- Configuration loading from `signal-config.yaml` into
//!   strongly-typed structs.
//! - [`control`] -- Background control surface (start, stop, summary).
//! - [`controller`] -- Holding/clearing phase state machine.
//! - [`decision`] -- [`DecisionSource`] trait, policy and round-robin sources.
//! - [`demand`] -- Seeded route file generation.
//! - [`encoder`] -- Lane classification and occupancy state vectors.
//! - [`engine`] -- Capability traits for engine sessions and launchers.
//! - [`metrics`] -- Summaries, improvement, and the per-run aggregator.
//! - [`operator`] -- Atomic run control flags.
//! - [`orchestrator`] -- The dual-session run loop.
//! - [`outbound`] -- Bounded, lossy record queue for streaming.
//! - [`phase`] -- Action to phase code lookup table.
//! - [`policy`] -- [`Policy`] trait and the dense network policy.
//! - [`synthetic`] -- Deterministic in-process engine double.
//!
//! [`Probe`]: bridge::Probe
//! [`DecisionSource`]: decision::DecisionSource
//! [`Policy`]: policy::Policy

pub mod bridge;
pub mod config;
pub mod control;
pub mod controller;
pub mod decision;
pub mod demand;
pub mod encoder;
pub mod engine;
pub mod metrics;
pub mod operator;
pub mod orchestrator;
pub mod outbound;
pub mod phase;
pub mod policy;
pub mod synthetic;
