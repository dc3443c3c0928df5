//! Retry backoff schedule.
//!
//! One schedule is used everywhere a transient failure is retried:
//! base 100 ms, doubling per attempt, capped at 30 s, with ±25% jitter
//! so a fleet of agents does not retry in lockstep.

use rand::Rng;
use std::time::Duration;

/// Base delay before the first retry.
pub const BASE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on any single delay.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Jitter fraction applied to each delay (±25%).
pub const JITTER: f64 = 0.25;

/// Exponential backoff state.
///
/// # Example
///
/// ```
/// use hive_bus::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new();
/// let first = backoff.next_delay();
/// let second = backoff.next_delay();
/// // Jitter aside, delays double and never exceed the cap.
/// assert!(first >= Duration::from_millis(75));
/// assert!(second <= Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Creates a fresh schedule at attempt zero.
    #[must_use]
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Returns the number of delays handed out so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Computes the next delay and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16); // 100ms << 16 already clears the cap
        self.attempt += 1;

        let raw = BASE_DELAY
            .saturating_mul(1u32 << exp)
            .min(MAX_DELAY)
            .as_secs_f64();
        let factor = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
        Duration::from_secs_f64(raw * factor).min(MAX_DELAY)
    }

    /// Resets the schedule after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let mut b = Backoff::new();
        let mut last = Duration::ZERO;
        for i in 0..12 {
            let d = b.next_delay();
            assert!(d <= MAX_DELAY, "attempt {i} exceeded cap: {d:?}");
            if i < 6 {
                // Below the cap the trend is upward even with jitter
                // pulling 25% either way.
                assert!(d.as_secs_f64() > last.as_secs_f64() * 0.5);
            }
            last = d;
        }
    }

    #[test]
    fn jitter_stays_in_band() {
        let mut b = Backoff::new();
        let d = b.next_delay().as_secs_f64();
        let base = BASE_DELAY.as_secs_f64();
        assert!(d >= base * (1.0 - JITTER) - f64::EPSILON);
        assert!(d <= base * (1.0 + JITTER) + f64::EPSILON);
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut b = Backoff::new();
        b.next_delay();
        b.next_delay();
        assert_eq!(b.attempts(), 2);
        b.reset();
        assert_eq!(b.attempts(), 0);
    }
}
