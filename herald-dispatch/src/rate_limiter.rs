//! Relay rate limiting using the token bucket algorithm
//!
//! Every delivery attempt, retries included, takes one token. The bucket holds
//! `max_sends` tokens and refills at `max_sends / window_secs` tokens per second,
//! so no window of `window_secs` seconds sees more than roughly `max_sends`
//! attempts once the initial burst is spent.
//!
//! ```text
//! Rate limit: 10 sends per 2 seconds
//! - Bucket starts with 10 tokens
//! - Tokens refill at 5/sec
//! - 10 attempts go out immediately, then one every 200ms
//! ```

use std::time::Duration;

use herald_common::internal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configuration for rate limiting
///
/// A `max_sends` or `window_secs` of zero disables limiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Attempts allowed per window
    #[serde(default = "default_max_sends")]
    pub max_sends: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_sends: default_max_sends(),
            window_secs: default_window_secs(),
        }
    }
}

const fn default_max_sends() -> u32 {
    10
}

const fn default_window_secs() -> u64 {
    1
}

impl RateLimitConfig {
    /// No limit at all
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_sends: 0,
            window_secs: 0,
        }
    }

    const fn is_unlimited(&self) -> bool {
        self.max_sends == 0 || self.window_secs == 0
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    #[allow(clippy::cast_precision_loss)]
    fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.max_sends);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / config.window_secs as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
    }
}

/// Token bucket shared by every worker of every run on one dispatcher
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            bucket: (!config.is_unlimited()).then(|| Mutex::new(TokenBucket::new(config))),
        }
    }

    /// Take a token if one is available
    ///
    /// Returns `Err(Duration)` with the wait until the next token otherwise.
    pub fn check_rate_limit(&self) -> Result<(), Duration> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };

        let mut bucket = bucket.lock();
        if bucket.try_consume() {
            Ok(())
        } else {
            let wait_time = bucket.time_until_available();
            drop(bucket);
            internal!(
                level = DEBUG,
                "Rate limit exceeded, waiting {:.3}s",
                wait_time.as_secs_f64()
            );
            Err(wait_time)
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        while let Err(wait) = self.check_rate_limit() {
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}
