//! Wall-clock access and time bucketing.
//!
//! Every store and the token authenticator read time through [`Clock`] so tests
//! can drive windows forward without sleeping.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of "now" in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Round `now_ms` down to the start of its `bucket_ms` slice.
///
/// A non-positive bucket size leaves the timestamp untouched.
#[must_use]
pub fn time_bucket(now_ms: i64, bucket_ms: i64) -> i64 {
    if bucket_ms <= 0 {
        return now_ms;
    }
    now_ms.div_euclid(bucket_ms) * bucket_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_bucket_rounds_down() {
        assert_eq!(time_bucket(1_700_000_012_345, 30_000), 1_700_000_010_000);
        assert_eq!(time_bucket(60_000, 30_000), 60_000);
        assert_eq!(time_bucket(59_999, 30_000), 30_000);
    }

    #[test]
    fn time_bucket_handles_negative_and_zero_sizes() {
        assert_eq!(time_bucket(-1, 30_000), -30_000);
        assert_eq!(time_bucket(12_345, 0), 12_345);
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
