//! Retry with exponential backoff and proportional jitter
//!
//! The delay before retry `n` (1-based) is
//! `min(base * 2^(n-1) * (1 + U[0, jitter]), max)`. A retry budget of `k`
//! allows at most `k + 1` attempts of one logical operation. Attempt counters
//! live inside a single [`RetryExecutor::execute`] call and are never shared.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Terminal failure of a retried operation
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error and the budget ran out
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The policy refused to retry this error
    #[error("non-retryable failure on attempt {attempts}: {error}")]
    Stopped { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up.
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Stopped { attempts, .. } => *attempts,
        }
    }

    /// The error returned by the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Stopped { error, .. } => error,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Invalid retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid retry configuration: {0}")]
pub struct RetryConfigError(String);

/// Result of a retry execution with summary statistics.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: RetryResult<T, E>,
    pub attempts: u32,
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn into_result(self) -> RetryResult<T, E> {
        self.result
    }
}

/// Decides whether a failed attempt may be retried
pub trait RetryPolicy<E> {
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Stop,
}

/// Random spread applied on top of the exponential delay
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    None,
    /// Multiply the delay by `1 + U[0, fraction]`.
    Proportional(f64),
}

impl Jitter {
    fn fraction(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Proportional(fraction) => fraction,
        }
    }
}

/// Retry budget and backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: Jitter::Proportional(0.3),
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// # Errors
    /// Returns `RetryConfigError` when the delay bounds are inverted or the
    /// jitter fraction lies outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.base_delay > self.max_delay {
            return Err(RetryConfigError(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        let fraction = self.jitter.fraction();
        if !(0.0..=1.0).contains(&fraction) {
            return Err(RetryConfigError(format!("jitter fraction {fraction} outside [0, 1]")));
        }
        Ok(())
    }

    /// Delay before retry `retry` (1-based), drawing jitter from the thread
    /// RNG.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_with_sample(retry, sample)
    }

    /// Delay before retry `retry` for a jitter sample in `[0, 1]`.
    ///
    /// `sample = 0.0` yields the lower bound `base * 2^(n-1)` and
    /// `sample = 1.0` the upper bound `base * 2^(n-1) * (1 + jitter)`, both
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_with_sample(&self, retry: u32, sample: f64) -> Duration {
        let exponent = retry.saturating_sub(1).min(62);
        let growth = 2_f64.powi(exponent as i32);
        let spread = 1.0 + self.jitter.fraction() * sample.clamp(0.0, 1.0);
        let secs = self.base_delay.as_secs_f64() * growth * spread;
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn exponential_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.config.base_delay = base_delay;
        self.config.max_delay = max_delay;
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    pub fn proportional_jitter(mut self, fraction: f64) -> Self {
        self.config.jitter = Jitter::Proportional(fraction);
        self
    }

    /// # Errors
    /// Returns `RetryConfigError` if the assembled configuration is invalid.
    pub fn build(self) -> Result<RetryConfig, RetryConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A failed attempt, reported to the observer passed to
/// [`RetryExecutor::execute_observed`]
#[derive(Debug)]
pub struct RetryEvent<'a, E> {
    /// 1-based attempt number that failed.
    pub attempt: u32,
    pub error: &'a E,
    /// Delay before the next attempt, `None` when this was the last one.
    pub retry_in: Option<Duration>,
}

/// Runs an operation under a [`RetryConfig`] and a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    pub const fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `operation` until it succeeds, the policy stops, or the budget
    /// runs out.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_observed(operation, |_| {}).await
    }

    /// Like [`execute`](Self::execute), reporting every failed attempt to
    /// `observe` before any backoff sleep starts.
    pub async fn execute_observed<F, Fut, T, E, O>(
        &self,
        mut operation: F,
        mut observe: O,
    ) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: FnMut(RetryEvent<'_, E>),
    {
        let mut attempt = 0_u32;
        let mut total_delay = Duration::ZERO;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay };
                }
                Err(error) => error,
            };

            if self.policy.should_retry(&error, attempt) == RetryDecision::Stop {
                debug!(attempt, error = %error, "retry policy stopped");
                observe(RetryEvent { attempt, error: &error, retry_in: None });
                return RetryOutcome {
                    result: Err(RetryError::Stopped { attempts: attempt, error }),
                    attempts: attempt,
                    total_delay,
                };
            }

            if attempt > self.config.max_retries {
                warn!(attempts = attempt, error = %error, "retry budget exhausted");
                observe(RetryEvent { attempt, error: &error, retry_in: None });
                return RetryOutcome {
                    result: Err(RetryError::Exhausted { attempts: attempt, last: error }),
                    attempts: attempt,
                    total_delay,
                };
            }

            let delay = self.config.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying after backoff");
            observe(RetryEvent { attempt, error: &error, retry_in: Some(delay) });
            tokio::time::sleep(delay).await;
            total_delay += delay;
        }
    }
}

/// Pre-defined retry policies
pub mod policies {
    use super::{RetryDecision, RetryPolicy};

    /// Never retries
    #[derive(Debug, Clone, Copy)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries whenever the predicate accepts the error
    #[derive(Debug, Clone, Copy)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub const fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E) -> bool,
    {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if (self.predicate)(error) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}
