//! Retry schedule shared by every model call.

use rand::prelude::*;
use serde::Deserialize;
use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (milliseconds).
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default cap on a single backoff delay (milliseconds).
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default jitter fraction applied around each delay.
pub const DEFAULT_JITTER: f64 = 0.25;

/// Exponential backoff schedule: `base * 2^(retry - 1)`, capped at
/// `max_delay`, then spread by `±jitter`.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::gateway::RetryConfig;
/// use std::time::Duration;
///
/// let policy = RetryConfig {
///     jitter: 0.0,
///     ..RetryConfig::default()
/// };
/// assert_eq!(policy.delay_for(1), Duration::from_millis(500));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
/// assert_eq!(policy.delay_for(20), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of a single delay before jitter, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter fraction in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryConfig {
    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32);
        let nominal = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);

        let jitter_range = (nominal as f64 * self.jitter.clamp(0.0, 0.99)) as u64;
        let delay = if jitter_range > 0 {
            let offset = rand::rng().random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
            (nominal as i64 + offset).max(0) as u64
        } else {
            nominal
        };
        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_jitter_band() {
        let policy = RetryConfig::default();
        for retry in 1..=8 {
            let nominal = (500u64 << (retry - 1)).min(30_000) as f64;
            let delay = policy.delay_for(retry).as_millis() as f64;
            assert!(delay >= nominal * 0.75 - 1.0, "retry {retry}: {delay}");
            assert!(delay <= nominal * 1.25 + 1.0, "retry {retry}: {delay}");
        }
    }

    #[test]
    fn huge_retry_numbers_do_not_overflow() {
        let policy = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30_000));
    }
}
