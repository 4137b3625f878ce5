//! Error types shared across crate boundaries

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Meridian ports
///
/// Adapters translate their own error enums into this one so that core
/// services never depend on transport details.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum MeridianError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Retries exhausted: {0}")]
    RetryExhausted(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeridianError {
    /// True when the user session was torn down because of this failure.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Result type alias for Meridian operations
pub type Result<T> = std::result::Result<T, MeridianError>;
