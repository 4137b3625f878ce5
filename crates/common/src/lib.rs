//! Session, retry and test utilities shared across Meridian crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: serialization, time and hashing dependencies (no I/O)
//! - `runtime`: async infrastructure (retry executor with backoff)
//! - `platform`: platform integrations (OAuth client, session manager,
//!   keychain store)
//! - `observability`: tracing instrumentation
//! - `test-utils`: in-memory doubles under [`testing`]

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Platform tier
// -------------------------------------------------------------------
#[cfg(feature = "platform")]
pub mod auth;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(all(feature = "platform", any(feature = "test-utils", test)))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "platform")]
pub use auth::{AuthError, AuthSnapshot, AuthState, SessionManager, UserProfile};
#[cfg(feature = "runtime")]
pub use resilience::{
    Jitter, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError, RetryEvent, RetryExecutor,
    RetryPolicy, RetryResult,
};
