//! Exponential backoff with jitter for transient node failures.
//!
//! Unlike a request-level retry policy there is no attempt limit: the loop
//! retries until the node answers or the stream is cancelled.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Configuration for the backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Maximum delay (caps exponential growth, before jitter).
    pub cap: Duration,
    /// Add up to `±jitter_fraction * delay` of jitter (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter_fraction: 0.1,
        }
    }
}

/// Tracks consecutive failures and computes the next delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return how long to wait before retrying:
    /// `min(base * 2^attempt, cap)` plus jitter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Forget past failures after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The un-jittered delay for a given zero-based attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.config
            .base
            .checked_mul(factor)
            .unwrap_or(self.config.cap)
            .min(self.config.cap)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt);
        let fraction = self.config.jitter_fraction.clamp(0.0, 1.0);
        if fraction == 0.0 {
            return capped;
        }
        // Clock-derived jitter in [-1.0, 1.0).
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let unit = (nanos % 2_000) as f64 / 1_000.0 - 1.0;
        let jitter = capped.as_secs_f64() * fraction * unit;
        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base_ms: u64, cap_ms: u64) -> Backoff {
        Backoff::new(BackoffConfig {
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(cap_ms),
            jitter_fraction: 0.0,
        })
    }

    #[test]
    fn delays_double() {
        let mut backoff = no_jitter(100, 30_000);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn delay_capped_at_max() {
        let mut backoff = no_jitter(100, 500);
        for _ in 0..50 {
            assert!(backoff.next_delay() <= Duration::from_millis(500));
        }
        assert_eq!(backoff.base_delay(40), Duration::from_millis(500));
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut backoff = no_jitter(100, 1_000);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_band() {
        let mut backoff = Backoff::new(BackoffConfig {
            base: Duration::from_millis(1_000),
            cap: Duration::from_secs(10),
            jitter_fraction: 0.2,
        });
        let d = backoff.next_delay();
        assert!(d >= Duration::from_millis(799), "d={d:?}");
        assert!(d <= Duration::from_millis(1_201), "d={d:?}");
    }
}
