//! Integration tests for resilience module
//!
//! Drives the retry executor with a controllable clock and verifies the
//! budget, stop conditions and backoff schedule.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meridian_common::resilience::{
    policies, RetryConfig, RetryDecision, RetryError, RetryExecutor, RetryPolicy,
};

/// Custom error type for testing
#[derive(Debug, Clone, PartialEq, Eq)]
enum TestError {
    Transient(u16),
    Fatal(u16),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(status) => write!(f, "transient status {status}"),
            Self::Fatal(status) => write!(f, "fatal status {status}"),
        }
    }
}

struct StatusPolicy;

impl RetryPolicy<TestError> for StatusPolicy {
    fn should_retry(&self, error: &TestError, _attempt: u32) -> RetryDecision {
        match error {
            TestError::Transient(_) => RetryDecision::Retry,
            TestError::Fatal(_) => RetryDecision::Stop,
        }
    }
}

fn config(max_retries: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_retries(max_retries)
        .exponential_backoff(Duration::from_millis(100), Duration::from_secs(5))
        .no_jitter()
        .build()
        .unwrap()
}

/// Three transient failures followed by a success use the whole default
/// budget and succeed on the fourth attempt.
#[tokio::test(start_paused = true)]
async fn test_recovers_on_last_attempt() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let executor = RetryExecutor::new(config(3), StatusPolicy);

    let outcome = executor
        .execute(|| {
            let counter = Arc::clone(&counter);
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0..=2 => Err(TestError::Transient(500)),
                    _ => Ok("done"),
                }
            }
        })
        .await;

    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.total_delay, Duration::from_millis(100 + 200 + 400));
    assert_eq!(outcome.into_result().unwrap(), "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

/// A persistent transient failure runs out the budget with the last error.
#[tokio::test(start_paused = true)]
async fn test_budget_exhaustion_reports_last_error() {
    let executor = RetryExecutor::new(config(2), StatusPolicy);

    let outcome = executor.execute(|| async { Err::<(), _>(TestError::Transient(503)) }).await;

    match outcome.into_result() {
        Err(RetryError::Exhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last, TestError::Transient(503));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

/// A fatal error stops immediately without sleeping.
#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_never_retried() {
    let executor = RetryExecutor::new(config(3), StatusPolicy);
    let start = tokio::time::Instant::now();

    let outcome = executor.execute(|| async { Err::<(), _>(TestError::Fatal(401)) }).await;

    assert_eq!(outcome.attempts, 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(matches!(outcome.result, Err(RetryError::Stopped { attempts: 1, .. })));
}

/// Observed delays follow the doubling schedule and stay inside the jitter
/// envelope.
#[tokio::test(start_paused = true)]
async fn test_observed_delays_stay_within_jitter_bounds() {
    let config = RetryConfig::builder()
        .max_retries(4)
        .exponential_backoff(Duration::from_millis(200), Duration::from_secs(60))
        .proportional_jitter(0.3)
        .build()
        .unwrap();
    let executor = RetryExecutor::new(config, policies::PredicateRetry::new(|_: &TestError| true));
    let delays = Mutex::new(Vec::new());

    let _ = executor
        .execute_observed(
            || async { Err::<(), _>(TestError::Transient(429)) },
            |event| delays.lock().unwrap().push(event.retry_in),
        )
        .await;

    let delays = delays.into_inner().unwrap();
    assert_eq!(delays.len(), 5);
    assert_eq!(delays[4], None, "the final attempt schedules no retry");
    for (index, delay) in delays[..4].iter().enumerate() {
        let nominal = 200_f64 * 2_f64.powi(index as i32);
        let millis = delay.unwrap().as_secs_f64() * 1_000.0;
        assert!(millis >= nominal - 0.001 && millis <= nominal * 1.3 + 0.001, "retry {index}: {millis}ms");
    }
}

/// The retry counter is scoped to one `execute` call.
#[tokio::test(start_paused = true)]
async fn test_budget_resets_between_calls() {
    let executor = RetryExecutor::new(config(1), StatusPolicy);

    for _ in 0..2 {
        let outcome = executor.execute(|| async { Err::<(), _>(TestError::Transient(502)) }).await;
        assert_eq!(outcome.attempts, 2);
    }
}

#[tokio::test(start_paused = true)]
async fn test_never_retry_policy() {
    let executor = RetryExecutor::new(config(5), policies::NeverRetry);
    let outcome = executor.execute(|| async { Err::<(), _>(TestError::Transient(500)) }).await;
    assert_eq!(outcome.attempts, 1);
}
