//! # Meridian Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - The resilient API gateway client and the HTTP job adapter
//! - Configuration loading from environment variables and files
//! - Logging setup
//! - Application wiring ([`AppContext`])
//!
//! ## Architecture
//! - Implements traits defined in `meridian-core`
//! - Depends on `meridian-common` for the session manager and retry
//! - Contains all "impure" code (network, files, environment)

pub mod api;
pub mod config;
pub mod context;
pub mod observability;

// Re-export commonly used items
pub use api::{ApiClient, ApiClientConfig, ApiError, ApiResponse, HttpJobApi, SessionHandle};
pub use context::{AppContext, ContextError};
pub use observability::{init_tracing, LogFormat};
