//! # I/O Clock
//!
//! The core never reads a wall clock itself; the dispatcher that drives a
//! partition supplies its own monotonic nanosecond source through this
//! trait, mirroring the per-dispatcher CPU clock of the original design.

use core::sync::atomic::{AtomicU64, Ordering};

/// Monotonic nanosecond clock supplied by the dispatcher
pub trait IoClock: Send + Sync {
    /// Current time in nanoseconds
    fn now_ns(&self) -> u64;
}

/// Hand-driven clock for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    ns: AtomicU64,
}

impl ManualClock {
    pub const fn new(start_ns: u64) -> Self {
        Self {
            ns: AtomicU64::new(start_ns),
        }
    }

    /// Move the clock forward
    pub fn advance_ns(&self, delta: u64) {
        self.ns.fetch_add(delta, Ordering::Relaxed);
    }

    /// Jump the clock to an absolute time
    pub fn set_ns(&self, now: u64) {
        self.ns.store(now, Ordering::Relaxed);
    }
}

impl IoClock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.ns.load(Ordering::Relaxed)
    }
}
