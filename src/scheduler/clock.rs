//! Time source abstraction.
//!
//! The scheduler never reads the platform clock directly; it asks an
//! injected [`TimeSource`]. Production wiring binds [`WallClock`], tests
//! bind [`VirtualClock`] and advance it by hand.

use crate::types::Time;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Supplies the current instant, in the same units as scheduler priorities.
pub trait TimeSource: Send + Sync {
    /// The current instant.
    fn now(&self) -> Time;
}

/// Monotonic production clock. The epoch is the moment of construction.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        let elapsed = self.epoch.elapsed().as_nanos();
        Time::from_nanos(elapsed.min(u128::from(u64::MAX)) as u64)
    }
}

/// Hand-advanced clock for deterministic tests.
///
/// Reads return whatever the test last set; nothing moves on its own.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock reading [`Time::ZERO`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let nanos = delta.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.now.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Sets the clock to an absolute reading. May move backwards; tests own
    /// the timeline.
    pub fn set(&self, instant: Time) {
        self.now.store(instant.as_nanos(), Ordering::Release);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}
