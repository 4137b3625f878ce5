//! Resilience patterns for transient failures
//!
//! Currently a single pattern: retry with exponential backoff and
//! proportional jitter. The HTTP gateway in `meridian-infra` plugs its own
//! [`RetryPolicy`] in (retryable statuses and timeouts) and observes every
//! failed attempt through [`RetryExecutor::execute_observed`].

pub mod retry;

pub use retry::{
    policies, Jitter, RetryConfig, RetryConfigBuilder, RetryConfigError, RetryDecision,
    RetryError, RetryEvent, RetryExecutor, RetryOutcome, RetryPolicy, RetryResult,
};
