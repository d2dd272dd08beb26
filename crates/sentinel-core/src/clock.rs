//! Time source abstraction
//!
//! The scheduler measures task run times and the automation controller
//! measures dwell times, so both need a monotonic clock. On the device
//! this is `embassy_time::Instant::now()`; on the host it is a
//! [`ManualClock`] that tests and the simulator advance explicitly.

use core::cell::Cell;

use embassy_time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// A clock that only moves when told to.
///
/// Uses interior mutability so a task under test can hold a shared
/// reference and "spend" time while the scheduler measures it.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl ManualClock {
    pub const fn new(start: Instant) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Jump to `at`. Ignored if `at` is in the past.
    pub fn advance_to(&self, at: Instant) {
        if at > self.now.get() {
            self.now.set(at);
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Instant::from_ticks(0))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}
