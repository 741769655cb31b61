//! Composed downstream call pipeline
//!
//! Every call passes, in this order:
//!
//! 1. the [`RateLimiter`] (waits for one token, once per logical call),
//! 2. a [`CircuitBreaker::check`] peek so an open circuit fails fast,
//! 3. the [`Bulkhead`], whose slot is held for the whole retry loop,
//! 4. the [`RetryExecutor`]; each attempt takes a breaker permit and reports
//!    its outcome.
//!
//! Only failures that reached the downstream (`Transient`, or the deadline
//! expiring in flight) count against the breaker. Client errors, local
//! timeouts and cancellation release the permit without counting.

use crate::backoff::RetryPolicy;
use crate::bulkhead::{Bulkhead, BulkheadConfig};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::clock::{SharedClock, SharedRandom};
use crate::context::CallContext;
use crate::error::{ConfigError, ResilienceError, Result};
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::retry::{RetryClassifier, RetryExecutor, TransientClassifier};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Settings for every stage of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Retry and backoff
    pub retry: RetryPolicy,
    /// Token bucket
    pub rate_limiter: RateLimiterConfig,
    /// Breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,
    /// Concurrency cap
    pub bulkhead: BulkheadConfig,
}

impl TransportConfig {
    /// Validates every component setting
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.retry.validate()?;
        self.rate_limiter.validate()?;
        self.circuit_breaker.validate()?;
        self.bulkhead.validate()
    }
}

/// Rate limiter, circuit breaker, bulkhead and retries around one downstream
pub struct ReliableTransport {
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    retry: RetryExecutor,
    clock: SharedClock,
}

impl std::fmt::Debug for ReliableTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableTransport")
            .field("rate_limiter", &self.rate_limiter)
            .field("breaker", &self.breaker)
            .field("bulkhead", &self.bulkhead)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ReliableTransport {
    /// Build the pipeline; fails on any invalid component setting
    pub fn new(
        config: TransportConfig,
        clock: SharedClock,
        random: SharedRandom,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let TransportConfig {
            retry,
            rate_limiter,
            circuit_breaker,
            bulkhead,
        } = config;

        Ok(Self {
            rate_limiter: RateLimiter::new(rate_limiter, clock.clone())?,
            breaker: CircuitBreaker::new(circuit_breaker, clock.clone())?,
            bulkhead: Bulkhead::new(bulkhead)?,
            retry: RetryExecutor::new(retry, clock.clone(), random)?,
            clock,
        })
    }

    /// The rate limiter stage
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// The circuit breaker stage
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The bulkhead stage
    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    /// The retry stage
    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    /// The clock shared by every stage
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Run `operation` through the pipeline, retrying transient failures
    pub async fn call<T, F, Fut>(&self, ctx: &CallContext, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.call_with_classifier(ctx, operation, &TransientClassifier)
            .await
    }

    /// Run `operation` through the pipeline with a custom retry classifier
    ///
    /// The classifier only decides whether to retry. Breaker accounting
    /// always follows the error kind.
    pub async fn call_with_classifier<T, F, Fut, C>(
        &self,
        ctx: &CallContext,
        mut operation: F,
        classifier: &C,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: RetryClassifier + ?Sized,
    {
        self.rate_limiter.acquire(1, ctx).await?;

        if let Err(e) = self.breaker.check() {
            tracing::debug!(circuit = %self.breaker.name(), "Call rejected by open circuit");
            return Err(e);
        }

        let _slot = self.bulkhead.try_enter()?;

        let breaker = &self.breaker;
        let clock = self.clock.as_ref();

        self.retry
            .execute(
                ctx,
                || {
                    let attempt = breaker.acquire().map(|permit| (permit, operation()));
                    async move {
                        let (permit, in_flight) = attempt?;
                        match ctx.run_in_flight(clock, in_flight).await {
                            Ok(Ok(value)) => {
                                permit.record_success();
                                Ok(value)
                            }
                            Ok(Err(e)) => {
                                if e.is_transient() {
                                    permit.record_failure();
                                } else {
                                    permit.release();
                                }
                                Err(e)
                            }
                            Err(e @ ResilienceError::Timeout { .. }) => {
                                tracing::debug!(
                                    circuit = %breaker.name(),
                                    "Deadline expired while the call was in flight"
                                );
                                permit.record_failure();
                                Err(e)
                            }
                            Err(e) => {
                                permit.release();
                                Err(e)
                            }
                        }
                    }
                },
                classifier,
            )
            .await
    }
}
