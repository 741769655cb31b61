//! Bounded retries and error classification
//!
//! [`RetryExecutor`] runs one operation until it succeeds, fails with an error
//! the classifier rejects, or the policy's attempt budget is spent.

use crate::backoff::{Backoff, RetryPolicy};
use crate::clock::{SharedClock, SharedRandom};
use crate::context::CallContext;
use crate::error::{ConfigError, ResilienceError, Result, TimeoutStage};
use std::future::Future;
use std::time::Duration;

/// Decides whether a failed attempt may be retried
pub trait RetryClassifier: Send + Sync {
    /// Check if the error is retryable
    fn is_retryable(&self, error: &ResilienceError) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&ResilienceError) -> bool + Send + Sync,
{
    fn is_retryable(&self, error: &ResilienceError) -> bool {
        self(error)
    }
}

/// Retries transient failures only
///
/// Client errors, admission rejections, timeouts and cancellation all stop
/// the retry loop immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientClassifier;

impl RetryClassifier for TransientClassifier {
    fn is_retryable(&self, error: &ResilienceError) -> bool {
        error.is_transient()
    }
}

/// HTTP status classification
#[derive(Debug, Clone, Default)]
pub struct HttpRetryClassifier;

impl HttpRetryClassifier {
    /// Check if HTTP status code is retryable
    pub fn is_status_retryable(status: u16) -> bool {
        matches!(
            status,
            408 | // Request Timeout
            425 | // Too Early
            429 | // Too Many Requests
            500 | // Internal Server Error
            502 | // Bad Gateway
            503 | // Service Unavailable
            504   // Gateway Timeout
        )
    }

    /// Check if status indicates remote rate limiting
    pub fn is_rate_limited(status: u16) -> bool {
        status == 429
    }

    /// Parse a `Retry-After` header given in seconds
    pub fn parse_retry_after(value: &str) -> Option<Duration> {
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// JSON-RPC error code classification
#[derive(Debug, Clone, Default)]
pub struct RpcRetryClassifier;

impl RpcRetryClassifier {
    /// Check if RPC error code is retryable
    pub fn is_code_retryable(code: i64) -> bool {
        matches!(
            code,
            -32099..=-32000 | // Server errors
            -32603          | // Internal error
            -32005            // Limit exceeded
        )
    }
}

/// Runs an operation under a [`RetryPolicy`]
pub struct RetryExecutor {
    policy: RetryPolicy,
    clock: SharedClock,
    random: SharedRandom,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Create an executor; fails if the policy is invalid
    pub fn new(
        policy: RetryPolicy,
        clock: SharedClock,
        random: SharedRandom,
    ) -> std::result::Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Self {
            policy,
            clock,
            random,
        })
    }

    /// The policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute retrying only transient failures
    pub async fn execute_default<T, F, Fut>(&self, ctx: &CallContext, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute(ctx, operation, &TransientClassifier).await
    }

    /// Execute `operation`, retrying while `classifier` accepts the error
    ///
    /// Backoff sleeps go through `ctx`, so they end early with `Cancelled` or
    /// `Timeout` when the caller gives up. When the budget is spent the last
    /// failure is returned wrapped in `RetriesExhausted`.
    pub async fn execute<T, F, Fut, C>(
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
        let mut backoff = Backoff::new(&self.policy, self.random.as_ref());
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !classifier.is_retryable(&error) {
                tracing::debug!(attempt = attempts, kind = %error.kind(), "Error is not retryable");
                return Err(error);
            }

            let Some(delay) = backoff.next() else {
                tracing::debug!(attempts, error = %error, "Retry budget exhausted");
                return Err(ResilienceError::RetriesExhausted {
                    attempts,
                    last: Box::new(error),
                });
            };

            tracing::debug!(
                attempt = attempts,
                remaining = backoff.remaining(),
                delay = ?delay,
                error = %error,
                "Operation failed, will retry"
            );
            ctx.sleep(self.clock.as_ref(), delay, TimeoutStage::Backoff)
                .await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedRandom, ManualClock};
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn executor(clock: &ManualClock, policy: RetryPolicy) -> RetryExecutor {
        RetryExecutor::new(policy, Arc::new(clock.clone()), Arc::new(FixedRandom::zero())).unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(Duration::ZERO)
    }

    #[test]
    fn test_invalid_policy_rejected_at_construction() {
        let clock = ManualClock::new();
        let result = RetryExecutor::new(
            policy().with_max_attempts(0),
            Arc::new(clock),
            Arc::new(FixedRandom::zero()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_success_first_try_has_no_delay() {
        let clock = ManualClock::new();
        let exec = executor(&clock, policy());
        let calls = AtomicU32::new(0);

        let result = exec
            .execute_default(&CallContext::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ResilienceError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_eventual_success_sleeps_between_attempts() {
        let clock = ManualClock::new();
        let exec = executor(&clock, policy());
        let calls = AtomicU32::new(0);

        let result = exec
            .execute_default(&CallContext::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ResilienceError::transient("connection reset"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let clock = ManualClock::new();
        let exec = executor(&clock, policy());
        let calls = AtomicU32::new(0);

        let result: Result<()> = exec
            .execute_default(&CallContext::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(ResilienceError::transient(format!("failure {}", n))) }
            })
            .await;

        match result.unwrap_err() {
            ResilienceError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.to_string(), "transient failure: failure 3");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let clock = ManualClock::new();
        let exec = executor(&clock, policy());
        let calls = AtomicU32::new(0);

        let result: Result<()> = exec
            .execute_default(&CallContext::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ResilienceError::client("invalid signature")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Client);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let clock = ManualClock::new();
        let exec = executor(&clock, policy());
        let calls = AtomicU32::new(0);
        let never = |_: &ResilienceError| false;

        let result: Result<()> = exec
            .execute(
                &CallContext::new(),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ResilienceError::transient("down")) }
                },
                &never,
            )
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_backoff() {
        let clock = ManualClock::new();
        let exec = executor(&clock, policy());
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::new().with_cancellation(token);

        let result: Result<()> = exec
            .execute_default(&ctx, || async { Err(ResilienceError::transient("down")) })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_deadline_during_backoff() {
        let clock = ManualClock::new();
        let exec = executor(&clock, policy());
        let ctx = CallContext::new().with_timeout(&clock, Duration::from_millis(150));
        let calls = AtomicU32::new(0);

        let result: Result<()> = exec
            .execute_default(&ctx, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ResilienceError::transient("down")) }
            })
            .await;

        // 100ms fits in the budget, the following 200ms wait does not
        match result.unwrap_err() {
            ResilienceError::Timeout { stage } => assert_eq!(stage, TimeoutStage::Backoff),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_http_status_retryable() {
        assert!(HttpRetryClassifier::is_status_retryable(500));
        assert!(HttpRetryClassifier::is_status_retryable(503));
        assert!(HttpRetryClassifier::is_status_retryable(429));
        assert!(!HttpRetryClassifier::is_status_retryable(400));
        assert!(!HttpRetryClassifier::is_status_retryable(404));
        assert!(HttpRetryClassifier::is_rate_limited(429));
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(
            HttpRetryClassifier::parse_retry_after("60"),
            Some(Duration::from_secs(60))
        );
        assert!(HttpRetryClassifier::parse_retry_after("soon").is_none());
    }

    #[test]
    fn test_rpc_code_retryable() {
        assert!(RpcRetryClassifier::is_code_retryable(-32000));
        assert!(RpcRetryClassifier::is_code_retryable(-32603));
        assert!(!RpcRetryClassifier::is_code_retryable(-32600));
        assert!(!RpcRetryClassifier::is_code_retryable(-32601));
    }
}
