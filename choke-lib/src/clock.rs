use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Wall-clock instant with microsecond resolution.
///
/// Grace-window expiries are shared between processes, so they are stored as
/// microseconds since the Unix epoch rather than as a process-local
/// [`std::time::Instant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Timestamp from microseconds since the Unix epoch
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Timestamp from whole seconds since the Unix epoch
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000))
    }

    /// Microseconds since the Unix epoch
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Add a duration, saturating at the representable maximum
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(micros))
    }

    /// Time left until `self`, or `None` if `self` is not after `now`
    #[must_use]
    pub fn remaining_since(self, now: Timestamp) -> Option<Duration> {
        let delta = self.0.checked_sub(now.0)?;
        u64::try_from(delta)
            .ok()
            .filter(|d| *d > 0)
            .map(Duration::from_micros)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self(i64::try_from(since.as_micros()).unwrap_or(i64::MAX)),
            Err(before) => {
                Self(-i64::try_from(before.duration().as_micros()).unwrap_or(i64::MAX))
            }
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(1_000_000);
        let micros = self.0.rem_euclid(1_000_000);
        write!(f, "{secs}.{micros:06}")
    }
}

/// Source of the current time for admission decisions
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current wall-clock time
    fn now(&self) -> Timestamp;
}

/// The system wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from(SystemTime::now())
    }
}

/// A clock that only moves when told to.
///
/// Used to make grace and flap period behavior deterministic.
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    #[must_use]
    pub const fn new(start: Timestamp) -> Self {
        Self {
            micros: AtomicI64::new(start.as_micros()),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, now: Timestamp) {
        self.micros.store(now.as_micros(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic() {
        let start = Timestamp::from_secs(1_000);
        let later = start.saturating_add(Duration::from_secs(10));
        assert_eq!(later.as_micros(), 1_010_000_000);
        assert_eq!(later.remaining_since(start), Some(Duration::from_secs(10)));
        assert_eq!(start.remaining_since(later), None);
        assert_eq!(start.remaining_since(start), None);
    }

    #[test]
    fn test_timestamp_saturates() {
        let ts = Timestamp::from_micros(i64::MAX - 1);
        assert_eq!(ts.saturating_add(Duration::from_secs(1)).as_micros(), i64::MAX);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(Timestamp::from_secs(5));
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), Timestamp::from_micros(6_500_000));
        clock.set(Timestamp::from_secs(1));
        assert_eq!(clock.now(), Timestamp::from_secs(1));
    }

    #[test]
    fn test_display() {
        assert_eq!(Timestamp::from_micros(1_500_042).to_string(), "1.500042");
    }

    #[test]
    fn test_system_clock_is_after_epoch() {
        assert!(SystemClock.now() > Timestamp::from_secs(0));
    }
}
