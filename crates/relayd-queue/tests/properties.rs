//! Property tests for queue ordering, backoff bounds and dispatch accounting

use proptest::prelude::*;
use relayd_queue::{
    sanitize_message, Batcher, BatcherConfig, QueueConfig, TransactionQueue, MAX_MESSAGE_CHARS,
};
use relayd_resilience::{
    BulkheadConfig, CircuitBreakerConfig, Clock, ManualClock, RateLimiterConfig,
    ReliableTransport, ResilienceError, RetryPolicy, TransportConfig,
};
use relayd_testing::{
    hex_secret, outcome_script, queue_config, retry_policy, to_outcomes, unique_jobs,
    ScriptedDownstream, SeededRandom,
};
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn test_backoff_delay_never_exceeds_cap(policy in retry_policy(), attempt in 1u32..200, seed in any::<u64>()) {
        let random = SeededRandom::new(seed);
        prop_assert!(policy.delay(attempt, &random) <= policy.max_delay);
    }

    #[test]
    fn test_uncapped_delay_is_monotonic(policy in retry_policy(), attempt in 1u32..60) {
        prop_assert!(policy.uncapped_delay(attempt) <= policy.uncapped_delay(attempt + 1));
    }

    #[test]
    fn test_dequeue_preserves_enqueue_order(jobs in unique_jobs(32)) {
        let clock = ManualClock::new();
        let queue = TransactionQueue::new(QueueConfig::default(), Arc::new(clock)).unwrap();
        let ids: Vec<String> = jobs.iter().map(|j| j.id().to_string()).collect();
        for job in jobs {
            queue.enqueue(job).unwrap();
        }

        let drained: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|j| j.id().to_string())
            .collect();
        prop_assert_eq!(drained, ids);
    }

    #[test]
    fn test_requeue_delay_within_bounds(config in queue_config(), seed in any::<u64>(), failures in 1u32..6) {
        let clock = ManualClock::new();
        let queue = TransactionQueue::new(config.clone(), Arc::new(clock.clone()))
            .unwrap()
            .with_random(Arc::new(SeededRandom::new(seed)));
        queue
            .enqueue(relayd_queue::TransactionJob::with_id("tx-1", relayd_queue::Payload::bytes(vec![1])))
            .unwrap();

        let cause = ResilienceError::transient("503");
        for _ in 0..failures {
            let Some(job) = queue.dequeue() else { break };
            let outcome = queue.record_failure(&job, &cause).unwrap();
            if outcome.is_terminal() {
                prop_assert!(outcome.job().attempts() >= config.max_attempts);
                prop_assert!(!queue.contains("tx-1"));
                break;
            }
            let ready_at = outcome.job().next_available_at().unwrap();
            prop_assert!(ready_at > clock.now());
            prop_assert!(ready_at <= clock.now() + config.max_backoff);
            clock.advance(ready_at - clock.now());
        }
    }

    #[test]
    fn test_sanitized_message_hides_secrets(secret in hex_secret(), prefix in "[a-z ]{0,40}") {
        let raw = format!("{}signature: {} tx {}", prefix, secret, secret);
        let clean = sanitize_message(&raw);
        prop_assert!(!clean.contains(secret.trim_start_matches("0x")));
        prop_assert!(clean.chars().count() <= MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_sanitized_message_length_capped(raw in ".{0,1024}") {
        prop_assert!(sanitize_message(&raw).chars().count() <= MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_dispatch_partitions_jobs(jobs in unique_jobs(12), scripts in prop::collection::vec(outcome_script(1), 12)) {
        let clock = ManualClock::new();
        let queue = Arc::new(TransactionQueue::new(QueueConfig::default(), Arc::new(clock.clone())).unwrap());
        let transport = Arc::new(
            ReliableTransport::new(
                TransportConfig {
                    retry: RetryPolicy::new().with_max_attempts(1),
                    rate_limiter: RateLimiterConfig::new(1000.0, 1000),
                    circuit_breaker: CircuitBreakerConfig::new("prop").with_failure_threshold(1000),
                    bulkhead: BulkheadConfig::new(64),
                },
                Arc::new(clock.clone()),
                Arc::new(SeededRandom::new(1)),
            )
            .unwrap(),
        );

        let mut node = ScriptedDownstream::new("prop-node");
        for (job, script) in jobs.iter().zip(&scripts) {
            node = node.script(job.id(), to_outcomes(script));
        }
        let expected_failures = jobs
            .iter()
            .zip(&scripts)
            .filter(|(_, script)| script.first().copied().unwrap_or(false))
            .count();
        let total = jobs.len();
        for job in jobs {
            queue.enqueue(job).unwrap();
        }

        let batcher = Batcher::new(
            BatcherConfig::default().with_batch_size(total),
            queue.clone(),
            transport,
            Arc::new(node),
        )
        .unwrap();
        let result = runtime().block_on(batcher.dispatch());

        prop_assert_eq!(result.len(), total);
        prop_assert_eq!(result.failure_count(), expected_failures);
        for success in &result.successful_jobs {
            prop_assert!(result.failed_jobs.iter().all(|f| f.job.id() != success.job.id()));
        }
        prop_assert_eq!(queue.size(), expected_failures);
        prop_assert_eq!(queue.in_flight_len(), 0);
    }
}

#[test]
fn test_default_policy_cap() {
    assert_eq!(RetryPolicy::default().max_delay, Duration::from_secs(10));
}
