//! Session access for the gateway
//!
//! The gateway only needs two things from the session: the current bearer
//! token and a way to end the session when the server rejects it.

use async_trait::async_trait;
use meridian_common::auth::SessionManager;

/// Source of access tokens for outgoing requests
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// A token valid for at least the renewal threshold, renewing first when
    /// needed. `None` sends the request unauthenticated.
    async fn access_token(&self) -> Option<String>;

    /// Drop the local session after the server returned 401.
    fn force_logout(&self);
}

#[async_trait]
impl SessionHandle for SessionManager {
    async fn access_token(&self) -> Option<String> {
        self.get_access_token().await
    }

    fn force_logout(&self) {
        Self::force_logout(self);
    }
}

/// Session that never has a token. Used for public endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl SessionHandle for Anonymous {
    async fn access_token(&self) -> Option<String> {
        None
    }

    fn force_logout(&self) {}
}
