//! Retry policy for delivery attempts.
//!
//! A recipient gets at most `max_attempts` attempts per run. Between attempts
//! the worker waits `base * 2^(attempt - 1)` seconds, capped at the maximum
//! delay and optionally randomised by the jitter factor.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration for delivery attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts per recipient per run.
    ///
    /// Default: 3 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff (in seconds).
    ///
    /// Default: 1 second
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Maximum retry delay (in seconds).
    ///
    /// Default: 8 seconds
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Jitter factor for randomizing retry delays, within ±`retry_jitter_factor`.
    ///
    /// Default: 0.0 (deterministic backoff)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts available to a recipient in one run, never less than one.
    #[must_use]
    pub const fn attempt_budget(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Check if another attempt may follow, given the attempts made so far in this run.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.attempt_budget()
    }

    /// Delay before the attempt that follows attempt number `attempts_made` (1-indexed).
    #[must_use]
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        backoff_delay(
            attempts_made,
            self.base_retry_delay_secs,
            self.max_retry_delay_secs,
            self.retry_jitter_factor,
        )
    }
}

/// Exponential backoff with jitter
///
/// `delay = min(base * 2^(attempt - 1), max_delay) * (1 ± jitter)`
#[must_use]
pub fn backoff_delay(
    attempt: u32,
    base_delay_secs: u64,
    max_delay_secs: u64,
    jitter_factor: f64,
) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        max_delay_secs
    } else {
        base_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(max_delay_secs)
    };

    if jitter_factor <= 0.0 || delay == 0 {
        return Duration::from_secs(delay);
    }

    #[allow(clippy::cast_precision_loss)]
    let delay = delay as f64;
    let jitter_range = delay * jitter_factor.min(1.0);
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((delay + jitter).max(0.0))
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_retry_delay_secs() -> u64 {
        1
    }

    pub const fn max_retry_delay_secs() -> u64 {
        8
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_retry_delay_secs, 1);
        assert_eq!(policy.max_retry_delay_secs, 8);
        assert!(policy.retry_jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_zero_attempts_still_allows_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.attempt_budget(), 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(5), Duration::from_secs(8));
        assert_eq!(policy.backoff(200), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..100 {
            let delay = backoff_delay(3, 10, 3600, 0.25);
            assert!(delay >= Duration::from_secs(30), "{delay:?} below range");
            assert!(delay <= Duration::from_secs(50), "{delay:?} above range");
        }
    }

    #[test]
    fn test_partial_policy_deserializes_with_defaults() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 5}"#).expect("policy should parse");

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.max_retry_delay_secs, 8);
    }
}
