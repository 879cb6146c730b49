//! Shared run control state.
//!
//! [`RunControl`] is shared between the control thread and whatever drives
//! it (the binary's signal handler, a status endpoint, tests). It uses
//! atomics only, so the control loop can poll the stop flag every tick
//! without taking a lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Atomic run flags.
#[derive(Debug, Default)]
pub struct RunControl {
    /// Whether a run is currently executing.
    running: AtomicBool,

    /// Whether a stop has been requested for the current run.
    stop_requested: AtomicBool,

    /// Last tick completed by the current (or last) run.
    current_tick: AtomicU64,
}

impl RunControl {
    /// Idle control state.
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Mark a run as started.
    ///
    /// Returns `false` if a run is already executing. Clears any stale
    /// stop request on success.
    pub fn begin(&self) -> bool {
        let claimed = self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            self.stop_requested.store(false, Ordering::Release);
            self.current_tick.store(0, Ordering::Release);
        }
        claimed
    }

    /// Mark the current run as finished.
    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Whether a run is executing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request a clean stop at the next tick boundary.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    /// Record the number of ticks completed so far.
    pub fn record_tick(&self, ticks: u64) {
        self.current_tick.store(ticks, Ordering::Release);
    }

    /// Ticks completed by the current (or last) run.
    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Acquire)
    }
}
