//! Seams between the session manager and its collaborators
//!
//! The identity provider client and the navigation host are injected so the
//! session state machine can be driven by test doubles.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use super::client::OAuthClientError;
use super::types::{AuthorizationRequest, TokenResponse, UserProfile};

/// Identity provider operations used by the session manager
#[async_trait]
pub trait OAuthClientTrait: Send + Sync {
    /// Authorize endpoint URL for one login attempt.
    fn authorization_url(&self, request: &AuthorizationRequest) -> Url;

    /// End-session URL carrying only `client_id` and
    /// `post_logout_redirect_uri`, or the post-logout URI itself when the
    /// provider has no end-session endpoint.
    fn end_session_url(&self) -> Url;

    /// `authorization_code` grant with the PKCE verifier.
    ///
    /// # Errors
    /// Returns `OAuthClientError` on transport failure or a non-2xx response.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, OAuthClientError>;

    /// `refresh_token` grant.
    ///
    /// # Errors
    /// Returns `OAuthClientError` on transport failure or a non-2xx response.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, OAuthClientError>;

    /// Profile from the userinfo endpoint, `Ok(None)` when the provider has
    /// none.
    ///
    /// # Errors
    /// Returns `OAuthClientError` on transport failure or a non-2xx response.
    async fn fetch_userinfo(&self, access_token: &str) -> Result<Option<UserProfile>, OAuthClientError>;
}

/// Full-page navigation performed by the host (browser or desktop shell)
pub trait Navigator: Send + Sync {
    /// # Errors
    /// Returns `NavigationError` when the host cannot open `url`.
    fn redirect(&self, url: &Url) -> Result<(), NavigationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("navigation failed: {0}")]
pub struct NavigationError(pub String);
