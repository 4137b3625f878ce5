//! Session-level error taxonomy

use std::time::Duration;

use thiserror::Error;

use super::client::OAuthClientError;
use super::store::StoreError;
use super::traits::NavigationError;

/// Errors surfaced by [`SessionManager`](super::SessionManager)
#[derive(Debug, Error)]
pub enum AuthError {
    /// No stored authorization request matches the callback state
    /// (replayed, stale, or already consumed).
    #[error("no pending authorization request matches the callback state")]
    StateMismatch { state: String },

    /// The identity provider redirected back with an `error` parameter.
    #[error("authorization denied by identity provider: {error}")]
    AuthorizationDenied { error: String, description: Option<String> },

    #[error("token exchange failed: {0}")]
    TokenExchange(#[source] OAuthClientError),

    /// Silent renewal failed. The session must be torn down.
    #[error("silent token renewal failed: {0}")]
    SilentRenew(String),

    #[error("no active session")]
    NotAuthenticated,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("provider discovery failed: {0}")]
    Discovery(String),

    #[error("invalid auth configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Navigation(#[from] NavigationError),
}

impl AuthError {
    /// Failures the UI reports as "authentication failed" before sending the
    /// user back to login.
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::StateMismatch { .. } | Self::AuthorizationDenied { .. } | Self::TokenExchange(_)
        )
    }
}

/// How the UI reacts to a failed callback
///
/// The message stays on screen for `redirect_delay`, then the UI starts one
/// fresh login. It never loops back automatically after a second failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackFailurePolicy {
    pub redirect_delay: Duration,
}

impl Default for CallbackFailurePolicy {
    fn default() -> Self {
        Self { redirect_delay: Duration::from_secs(3) }
    }
}

impl CallbackFailurePolicy {
    /// Delay before redirecting to login, or `None` when the error is not an
    /// authentication failure or a retry already happened.
    #[must_use]
    pub fn redirect_after(&self, error: &AuthError, already_retried: bool) -> Option<Duration> {
        (error.is_authentication_failure() && !already_retried).then_some(self.redirect_delay)
    }
}
