//! Retry policy for generation calls.
//!
//! Only errors the caller classifies as retryable are re-issued. Delays grow
//! per the backoff strategy and are spread with jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first call.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 8_000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// Attempt bookkeeping for one retried operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: usize,
    previous_delay_ms: Option<u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Returns true once no attempts remain.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempts >= config.max_attempts.max(1)
    }

    /// Calculates the delay before the next attempt.
    #[must_use]
    pub fn next_delay(&mut self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let retry = self.attempts.saturating_sub(1);

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => {
                let exponent = u32::try_from(retry).unwrap_or(u32::MAX).min(32);
                base.saturating_mul(2u64.saturating_pow(exponent)).min(max)
            }
            BackoffStrategy::Linear => base
                .saturating_mul(u64::try_from(retry + 1).unwrap_or(u64::MAX))
                .min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay_ms.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                if upper <= base {
                    base
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                }
            }
        };

        self.previous_delay_ms = Some(jittered);
        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more attempts remain.
    GiveUp,
    /// The error is not retryable.
    NotRetryable,
}

/// Decides whether to re-issue after a failed attempt.
#[must_use]
pub fn should_retry(state: &mut RetryState, config: &RetryConfig, retryable: bool) -> RetryDecision {
    if !retryable {
        return RetryDecision::NotRetryable;
    }
    if state.is_exhausted(config) {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(state.next_delay(config))
}

/// Result of [`with_retry`] along with how many attempts it took.
#[derive(Debug)]
pub struct Retried<T, E> {
    /// The final result.
    pub result: Result<T, E>,
    /// Attempts made, at least one.
    pub attempts: usize,
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent.
pub async fn with_retry<T, E, F, Fut, P>(
    config: &RetryConfig,
    key: &str,
    is_retryable: P,
    mut operation: F,
) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut state = RetryState::new();

    loop {
        state.record_attempt();
        match operation().await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: state.attempts,
                }
            }
            Err(e) => match should_retry(&mut state, config, is_retryable(&e)) {
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        key,
                        attempt = state.attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    return Retried {
                        result: Err(e),
                        attempts: state.attempts,
                    };
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(config.jitter_strategy, JitterStrategy::Full);
    }

    #[test]
    fn test_exponential_delays_without_jitter() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new();

        state.record_attempt();
        assert_eq!(state.next_delay(&config), Duration::from_millis(100));
        state.record_attempt();
        assert_eq!(state.next_delay(&config), Duration::from_millis(200));
        state.record_attempt();
        assert_eq!(state.next_delay(&config), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_constant_delays() {
        let linear = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new();
        state.attempts = 3;
        assert_eq!(state.next_delay(&linear), Duration::from_millis(300));

        let constant = linear.with_backoff(BackoffStrategy::Constant);
        assert_eq!(state.next_delay(&constant), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new();
        state.attempts = 40;
        assert_eq!(state.next_delay(&config), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        let mut state = RetryState::new();
        state.record_attempt();
        for _ in 0..20 {
            assert!(state.next_delay(&config) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_should_retry_respects_classification_and_budget() {
        let config = fast().with_max_attempts(2);
        let mut state = RetryState::new();

        state.record_attempt();
        assert_eq!(should_retry(&mut state, &config, false), RetryDecision::NotRetryable);
        assert!(matches!(should_retry(&mut state, &config, true), RetryDecision::Retry(_)));

        state.record_attempt();
        assert_eq!(should_retry(&mut state, &config, true), RetryDecision::GiveUp);
    }

    #[tokio::test]
    async fn test_with_retry_success_after_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();

        let outcome = with_retry(&fast().with_max_attempts(5), "test", |_: &String| true, || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("attempt {n}"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(outcome.result, Ok(42));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_at_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();

        let outcome: Retried<i32, String> =
            with_retry(&fast().with_max_attempts(3), "test", |_| true, || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err("always fails".to_string()) }
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_skips_non_retryable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();

        let outcome: Retried<i32, String> =
            with_retry(&fast().with_max_attempts(5), "test", |_| false, || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
