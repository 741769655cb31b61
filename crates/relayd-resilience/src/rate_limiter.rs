//! Token bucket rate limiting
//!
//! The bucket starts full. Before every check it is refilled by
//! `elapsed_seconds * requests_per_second`, capped at capacity. Fractional
//! rates such as 0.5 req/s are supported.

use crate::clock::SharedClock;
use crate::context::CallContext;
use crate::error::{ConfigError, ResilienceError, Result, TimeoutStage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Absorbs float rounding when a waiter wakes exactly on time
const TOKEN_EPSILON: f64 = 1e-9;

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Sustained refill rate
    pub requests_per_second: f64,
    /// Maximum burst size
    pub bucket_capacity: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            bucket_capacity: 10,
        }
    }
}

impl RateLimiterConfig {
    /// Create a config
    pub fn new(requests_per_second: f64, bucket_capacity: u32) -> Self {
        Self {
            requests_per_second,
            bucket_capacity,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(ConfigError::invalid(
                "rate_limiter",
                "requests_per_second",
                format!("must be a finite value > 0, got {}", self.requests_per_second),
            ));
        }
        if self.bucket_capacity < 1 {
            return Err(ConfigError::invalid(
                "rate_limiter",
                "bucket_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, config: &RateLimiterConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let capacity = f64::from(config.bucket_capacity);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * config.requests_per_second).min(capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, n: f64) -> bool {
        if self.tokens + TOKEN_EPSILON >= n {
            self.tokens = (self.tokens - n).max(0.0);
            true
        } else {
            false
        }
    }

    fn wait_for(&self, n: f64, config: &RateLimiterConfig) -> Duration {
        let deficit = (n - self.tokens).max(0.0);
        let secs = deficit / config.requests_per_second;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(Duration::MAX)
            .max(Duration::from_nanos(1))
    }
}

/// Token bucket limiter; all state changes happen under one lock
pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: SharedClock,
    bucket: Mutex<Bucket>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("bucket", &*self.bucket.lock())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter with a full bucket
    pub fn new(config: RateLimiterConfig, clock: SharedClock) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let bucket = Bucket {
            tokens: f64::from(config.bucket_capacity),
            last_refill: clock.now(),
        };
        Ok(Self {
            config,
            clock,
            bucket: Mutex::new(bucket),
        })
    }

    /// The configuration in use
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Tokens currently available, after refill
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.clock.now(), &self.config);
        bucket.tokens
    }

    /// Take `n` tokens if available; never consumes a partial amount
    pub fn try_acquire(&self, n: u32) -> bool {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.clock.now(), &self.config);
        bucket.try_take(f64::from(n))
    }

    /// Non-blocking acquire reporting a `RateLimited` error with the expected wait
    pub fn check(&self, n: u32) -> Result<()> {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.clock.now(), &self.config);
        let needed = f64::from(n);
        if bucket.try_take(needed) {
            Ok(())
        } else {
            Err(ResilienceError::RateLimited {
                retry_after: bucket.wait_for(needed, &self.config),
            })
        }
    }

    /// Wait until `n` tokens are available, then take them
    ///
    /// Fails with `Client` if `n` exceeds the bucket capacity, `Cancelled` if
    /// the context is cancelled, or `Timeout` if the wait would overrun the
    /// deadline.
    pub async fn acquire(&self, n: u32, ctx: &CallContext) -> Result<()> {
        if n > self.config.bucket_capacity {
            return Err(ResilienceError::client(format!(
                "requested {} tokens but bucket capacity is {}",
                n, self.config.bucket_capacity
            )));
        }
        let needed = f64::from(n);

        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                bucket.refill(self.clock.now(), &self.config);
                if bucket.try_take(needed) {
                    return Ok(());
                }
                bucket.wait_for(needed, &self.config)
            };

            tracing::trace!(tokens = n, wait = ?wait, "Waiting for rate limiter tokens");
            ctx.sleep(self.clock.as_ref(), wait, TimeoutStage::RateLimit)
                .await?;
        }
    }
}
