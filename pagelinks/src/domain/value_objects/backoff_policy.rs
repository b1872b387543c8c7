//! Backoff policy value object.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff applied between scrape attempts.
///
/// Stored alongside every queued job so a job keeps the policy it was
/// enqueued with even if the configuration changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl BackoffPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy with custom max attempts.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }

    /// Delay to wait after `attempts_made` failed attempts (1-indexed).
    ///
    /// `initial_delay * multiplier^(attempts_made - 1)`, capped at `max_delay`.
    pub fn delay_after_attempt(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = if base_delay.is_finite() {
            base_delay.min(self.max_delay_ms as f64) as u64
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(delay_ms)
    }

    /// Check if another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Get the total maximum time that could be spent waiting between attempts.
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_after_attempt(attempt))
            .sum()
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 2000);
    }

    #[test]
    fn test_no_retry() {
        let policy = BackoffPolicy::no_retry();
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_should_retry() {
        let policy = BackoffPolicy::with_max_attempts(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let policy = BackoffPolicy {
            max_attempts: 6,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_after_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.delay_after_attempt(6), Duration::from_millis(5000));
        assert_eq!(policy.delay_after_attempt(500), Duration::from_millis(5000));
    }

    #[test]
    fn test_delays_never_shrink() {
        let policy = BackoffPolicy {
            max_attempts: 20,
            initial_delay_ms: 300,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
        };
        let delays: Vec<_> = (1..20).map(|n| policy.delay_after_attempt(n)).collect();
        assert!(delays.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_max_total_delay() {
        let policy = BackoffPolicy::default();
        // two waits between three attempts
        assert_eq!(policy.max_total_delay(), Duration::from_millis(2000 + 4000));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed: BackoffPolicy = serde_json::from_str(r#"{"max_attempts":5}"#).unwrap();
        assert_eq!(parsed.max_attempts, 5);
        assert_eq!(parsed.initial_delay_ms, 2000);
        assert_eq!(parsed.backoff_multiplier, 2.0);
    }
}
