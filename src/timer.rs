//! Broadcast timer for periodic telemetry.
//!
//! A monotonic countdown that is *not* self-rearming: once it overflows it
//! keeps reporting overflow until [`BroadcastTimer::reset`] is called. The
//! gateway resets it right after the broadcast, so it fires at most once per
//! period even when an iteration runs late.

use std::time::{Duration, Instant};

/// Countdown measured against the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastTimer {
    period: Duration,
    fire_at: Instant,
}

impl BroadcastTimer {
    /// Start a timer that overflows `period` from now.
    pub fn new(period: Duration) -> Self {
        Self::starting_at(period, Instant::now())
    }

    /// Start a timer that overflows `period` after `now`.
    pub fn starting_at(period: Duration, now: Instant) -> Self {
        Self {
            period,
            fire_at: now + period,
        }
    }

    /// Whether the period has elapsed.
    pub fn overflow(&self) -> bool {
        self.overflow_at(Instant::now())
    }

    /// Whether the period has elapsed as of `now`.
    pub fn overflow_at(&self, now: Instant) -> bool {
        now >= self.fire_at
    }

    /// Re-arm for another full period starting now.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    /// Re-arm for another full period starting at `now`.
    pub fn reset_at(&mut self, now: Instant) {
        self.fire_at = now + self.period;
    }

    /// Configured period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Time left before overflow, zero once overflowed.
    pub fn remaining(&self) -> Duration {
        self.fire_at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_overflowed_before_period() {
        let start = Instant::now();
        let timer = BroadcastTimer::starting_at(Duration::from_secs(5), start);
        assert!(!timer.overflow_at(start));
        assert!(!timer.overflow_at(start + Duration::from_millis(4_999)));
    }

    #[test]
    fn test_overflow_stays_until_reset() {
        let start = Instant::now();
        let mut timer = BroadcastTimer::starting_at(Duration::from_secs(5), start);
        let late = start + Duration::from_secs(12);
        assert!(timer.overflow_at(late));
        // Not self-rearming: still overflowed much later
        assert!(timer.overflow_at(late + Duration::from_secs(60)));

        timer.reset_at(late);
        assert!(!timer.overflow_at(late + Duration::from_secs(4)));
        assert!(timer.overflow_at(late + Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_period_always_overflows() {
        let mut timer = BroadcastTimer::new(Duration::ZERO);
        assert!(timer.overflow());
        timer.reset();
        assert!(timer.overflow());
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_remaining_is_bounded_by_period() {
        let timer = BroadcastTimer::new(Duration::from_secs(5));
        assert!(timer.remaining() <= timer.period());
        assert!(!timer.overflow());
    }
}
