//! Wall-clock timestamps and the monotonic interval timer driving periodic
//! emission.
//!
//! Timestamps pair seconds with nanoseconds since the Unix epoch and travel
//! inside samples. The [`IntervalTimer`] is the only timed construct in the
//! core: a fixed-period monotonic timer whose wait reports how many periods
//! elapsed, so callers can count overruns instead of silently losing ticks.

use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// Seconds and nanoseconds after 1970-01-01 UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: u32,
}

impl Timestamp {
    pub const fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Capture the current wall-clock time.
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            sec: now.unix_timestamp(),
            nsec: now.nanosecond(),
        }
    }

    pub const fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    /// Elapsed seconds from `earlier` to this timestamp; negative when
    /// `earlier` is actually later.
    pub fn seconds_since(&self, earlier: Timestamp) -> f64 {
        (self.sec - earlier.sec) as f64 + (self.nsec as f64 - earlier.nsec as f64) * 1e-9
    }
}

/// A monotonic periodic timer.
///
/// `wait` blocks until the next multiple of the period and returns the
/// number of periods that elapsed since the previous call. A return value
/// greater than one means the caller missed ticks; the timer resynchronizes
/// its deadline so a single slow iteration does not produce a burst of
/// catch-up ticks.
#[derive(Debug)]
pub struct IntervalTimer {
    period: Duration,
    deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timer rate must be positive and finite")]
pub struct InvalidRate;

impl IntervalTimer {
    /// Create a timer firing `rate` times per second.
    pub fn from_rate(rate: f64) -> Result<Self, InvalidRate> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(InvalidRate);
        }
        let period = Duration::from_secs_f64(1.0 / rate);
        Ok(Self {
            period,
            deadline: Instant::now() + period,
        })
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next tick, returning the number of elapsed periods.
    ///
    /// Always returns at least 1.
    pub fn wait(&mut self) -> u64 {
        let now = Instant::now();
        if now < self.deadline {
            std::thread::sleep(self.deadline - now);
            self.deadline += self.period;
            return 1;
        }

        // We are late. Count the missed periods and move the deadline past
        // the present so the next wait sleeps again.
        let behind = now - self.deadline;
        let missed = behind.as_nanos() / self.period.as_nanos().max(1);
        let expirations = missed as u64 + 1;
        self.deadline += self.period * expirations as u32;
        expirations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_now_advances() {
        let a = Timestamp::now();
        std::thread::sleep(Duration::from_millis(2));
        let b = Timestamp::now();
        assert!(b > a);
        assert!(!a.is_zero());
    }

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp::new(5, 999_999_999);
        let b = Timestamp::new(6, 0);
        assert!(a < b);
        assert_eq!(a, Timestamp::new(5, 999_999_999));
    }

    #[test]
    fn test_seconds_since() {
        let a = Timestamp::new(100, 250_000_000);
        let b = Timestamp::new(101, 750_000_000);
        assert!((b.seconds_since(a) - 1.5).abs() < 1e-12);
        assert!((a.seconds_since(b) + 1.5).abs() < 1e-12);
        assert_eq!(a.seconds_since(a), 0.0);
    }

    #[test]
    fn test_interval_timer_rejects_bad_rates() {
        assert!(IntervalTimer::from_rate(0.0).is_err());
        assert!(IntervalTimer::from_rate(-10.0).is_err());
        assert!(IntervalTimer::from_rate(f64::NAN).is_err());
        assert!(IntervalTimer::from_rate(f64::INFINITY).is_err());
    }

    #[test]
    fn test_interval_timer_single_tick() {
        let mut timer = IntervalTimer::from_rate(200.0).unwrap();
        let expirations = timer.wait();
        assert_eq!(expirations, 1);
    }

    #[test]
    fn test_interval_timer_counts_overruns() {
        let mut timer = IntervalTimer::from_rate(1000.0).unwrap();
        // Miss several periods on purpose.
        std::thread::sleep(Duration::from_millis(5));
        let expirations = timer.wait();
        assert!(expirations > 1, "expected overrun, got {expirations}");
    }
}
