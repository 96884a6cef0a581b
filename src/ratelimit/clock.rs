//! Time sources for attempt timestamps.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// A recorded attempt instant.
pub type Timestamp = DateTime<Utc>;

/// Smallest step a timestamp can be nudged by to avoid a collision.
pub fn dedup_unit() -> TimeDelta {
    TimeDelta::nanoseconds(1)
}

/// Source of "now" for the attempt windows.
pub trait Clock: Send + Sync {
    /// Sample the current instant.
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to, for driving windows
/// deterministically in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock();
        *now += delta;
    }

    /// Jump the clock to `instant`, which may be in the past.
    pub fn set(&self, instant: Timestamp) {
        *self.now.lock() = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_frozen_until_advanced() {
        let clock = ManualClock::default();
        let first = clock.now();
        assert_eq!(clock.now(), first);

        clock.advance(TimeDelta::seconds(3));
        assert_eq!(clock.now(), first + TimeDelta::seconds(3));
    }

    #[test]
    fn test_manual_clock_can_step_backwards() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.set(start - TimeDelta::milliseconds(5));
        assert!(clock.now() < start);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
