//! Retry policy: exponential backoff between automatic runs and the optional
//! per-record attempt ceiling.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for automatic retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Failed attempts after which a record is abandoned. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay before the first automatic retry run, in milliseconds.
    pub initial_delay_ms: u64,
    /// Cap for exponential growth, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
    /// Whether to schedule retry runs at all while failures remain.
    /// Without it, failed records wait for the next reconnect or manual sync.
    pub scheduled: bool,
}

impl RetryConfig {
    /// Unbounded retry with default spacing.
    pub fn new() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: 30_000,
            max_delay_ms: 15 * 60 * 1000,
            backoff_multiplier: 2.0,
            jitter: true,
            scheduled: true,
        }
    }

    /// Abandon records after `attempts` failures.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Enable or disable scheduled retry runs.
    pub fn with_scheduled(mut self, scheduled: bool) -> Self {
        self.scheduled = scheduled;
        self
    }

    /// Delay before the next automatic run after `failed_runs` consecutive
    /// runs with failures (zero-based).
    pub fn delay_for_attempt(&self, failed_runs: u32) -> Duration {
        let exponent = failed_runs.min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);

        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let final_delay = if self.jitter {
            // Add random jitter of +/- 25%
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        // 1 * 10^5 = 100000 seconds, but should be capped at 10
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig::new().with_initial_delay(Duration::from_secs(4));
        for _ in 0..50 {
            let delay = config.delay_for_attempt(0);
            assert!(delay >= Duration::from_secs(3));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_unbounded_by_default() {
        assert_eq!(RetryConfig::default().max_attempts, None);
        assert_eq!(RetryConfig::new().with_max_attempts(0).max_attempts, Some(1));
    }

    #[test]
    fn test_partial_json() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(config.max_attempts, Some(5));
        assert!(config.jitter);
        assert_eq!(config.initial_delay_ms, 30_000);
    }
}
