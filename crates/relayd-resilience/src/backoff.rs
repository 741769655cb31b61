//! Exponential backoff with additive jitter
//!
//! The delay before retry `n` (1-indexed) is
//! `min(base_delay * backoff_multiplier^(n-1) + jitter_sample, max_delay)`
//! where `jitter_sample` is drawn uniformly from `[0, jitter)`.

use crate::clock::RandomSource;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry/backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "crate::serde_millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
    /// Upper bound of the random amount added to each delay
    #[serde(with = "crate::serde_millis", rename = "jitter_ms")]
    pub jitter: Duration,
    /// Cap applied after jitter
    #[serde(with = "crate::serde_millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(25),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter range
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Fast retries for latency-sensitive reads
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(50),
            backoff_multiplier: 1.5,
            jitter: Duration::from_millis(10),
            max_delay: Duration::from_secs(5),
        }
    }

    /// Slow, few retries for expensive submissions
    pub fn conservative() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(300),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Check every invariant of the policy
    pub fn validate(&self) -> Result<(), ConfigError> {
        const COMPONENT: &str = "retry";
        if self.max_attempts < 1 {
            return Err(ConfigError::invalid(COMPONENT, "max_attempts", "must be at least 1"));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::invalid(COMPONENT, "base_delay", "must be greater than zero"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                COMPONENT,
                "backoff_multiplier",
                format!("must be a finite value >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(
                COMPONENT,
                "max_delay",
                format!(
                    "must be at least base_delay ({:?}), got {:?}",
                    self.base_delay, self.max_delay
                ),
            ));
        }
        Ok(())
    }

    /// `base_delay * backoff_multiplier^(attempt-1)`, saturating
    pub fn uncapped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = self.backoff_multiplier.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Delay applied before retry `attempt`, jitter included and capped
    pub fn delay(&self, attempt: u32, random: &dyn RandomSource) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            self.jitter.mul_f64(random.next_unit())
        };
        self.uncapped_delay(attempt)
            .saturating_add(jitter)
            .min(self.max_delay)
    }
}

/// Iterator over the waits between attempts of one call
///
/// Yields `max_attempts - 1` delays; `None` means the retry budget is spent.
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    random: &'a dyn RandomSource,
    attempt: u32,
}

impl<'a> Backoff<'a> {
    /// Start a fresh backoff sequence
    pub fn new(policy: &'a RetryPolicy, random: &'a dyn RandomSource) -> Self {
        Self {
            policy,
            random,
            attempt: 0,
        }
    }

    /// Number of delays yielded so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Retries still available
    pub fn remaining(&self) -> u32 {
        self.policy
            .max_attempts
            .saturating_sub(1)
            .saturating_sub(self.attempt)
    }
}

impl Iterator for Backoff<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining() == 0 {
            return None;
        }
        self.attempt += 1;
        Some(self.policy.delay(self.attempt, self.random))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedRandom;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_jitter(Duration::ZERO)
    }

    #[test]
    fn test_default_policy_is_valid() {
        let policy = RetryPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn test_exponential_delays() {
        let policy = no_jitter();
        let random = FixedRandom::zero();
        assert_eq!(policy.delay(1, &random), Duration::from_millis(100));
        assert_eq!(policy.delay(2, &random), Duration::from_millis(200));
        assert_eq!(policy.delay(3, &random), Duration::from_millis(400));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = no_jitter().with_max_delay(Duration::from_millis(500));
        let random = FixedRandom::zero();
        assert_eq!(policy.uncapped_delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(4, &random), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_is_added_then_capped() {
        let policy = no_jitter()
            .with_jitter(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(450));
        let random = FixedRandom::new(0.5);
        assert_eq!(policy.delay(1, &random), Duration::from_millis(150));
        assert_eq!(policy.delay(2, &random), Duration::from_millis(250));
        assert_eq!(policy.delay(3, &random), Duration::from_millis(450));
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = no_jitter().with_max_delay(Duration::from_secs(30));
        assert_eq!(policy.delay(10_000, &FixedRandom::zero()), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(no_jitter().with_max_attempts(0).validate().is_err());
        assert!(no_jitter().with_base_delay(Duration::ZERO).validate().is_err());
        assert!(no_jitter().with_multiplier(0.5).validate().is_err());
        assert!(no_jitter().with_multiplier(f64::NAN).validate().is_err());
        assert!(no_jitter()
            .with_max_delay(Duration::from_millis(10))
            .validate()
            .is_err());
    }

    #[test]
    fn test_backoff_yields_waits_between_attempts() {
        let policy = no_jitter().with_max_attempts(4);
        let random = FixedRandom::zero();
        let delays: Vec<_> = Backoff::new(&policy, &random).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[test]
    fn test_single_attempt_has_no_backoff() {
        let policy = no_jitter().with_max_attempts(1);
        let random = FixedRandom::zero();
        assert_eq!(Backoff::new(&policy, &random).next(), None);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(RetryPolicy::aggressive().validate().is_ok());
        assert!(RetryPolicy::conservative().validate().is_ok());
    }

    #[test]
    fn test_serde_uses_milliseconds() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts":5,"base_delay_ms":250}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(10));

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["max_delay_ms"], 10_000);
    }
}
