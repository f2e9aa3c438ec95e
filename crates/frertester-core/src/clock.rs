//! Time sources for frame timestamps
//!
//! Latency is `arrival - send`, so generator and capture must read the same
//! clock. Three implementations are provided:
//! - [`SystemClock`]: wall clock, for captures stamped on another host
//! - [`MonotonicClock`]: wall-clock anchor plus a monotonic offset; follows
//!   tokio's paused clock, which makes paced tests deterministic
//! - [`ManualClock`]: advanced explicitly by the caller

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of `DateTime<Utc>` timestamps
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock (`Utc::now`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock anchor advanced by a monotonic timer
///
/// Immune to wall-clock steps during a run. Uses `tokio::time::Instant`, so
/// under `#[tokio::test(start_paused = true)]` it reports virtual time.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl MonotonicClock {
    /// Anchor at the current wall-clock time
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Anchor at an explicit wall-clock time
    pub fn anchored_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        offset(self.anchor, self.start.elapsed())
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = offset(*now, by);
    }

    /// Jump to an absolute time (may go backwards)
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `base + by`, saturating at `base` if the offset is out of chrono's range
pub fn offset(base: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| base.checked_add_signed(delta))
        .unwrap_or(base)
}

/// `later - earlier` as a `Duration`, or `None` when `later` precedes `earlier`
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Option<Duration> {
    (later - earlier).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(epoch());
        clock.advance(Duration::from_micros(250));
        assert_eq!(
            elapsed_between(epoch(), clock.now()),
            Some(Duration::from_micros(250))
        );
    }

    #[test]
    fn test_elapsed_between_negative_is_none() {
        let later = offset(epoch(), Duration::from_millis(5));
        assert_eq!(elapsed_between(later, epoch()), None);
        assert_eq!(elapsed_between(epoch(), epoch()), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_paused_time() {
        let clock = MonotonicClock::anchored_at(epoch());
        assert_eq!(clock.now(), epoch());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            elapsed_between(epoch(), clock.now()),
            Some(Duration::from_millis(10))
        );
    }
}
