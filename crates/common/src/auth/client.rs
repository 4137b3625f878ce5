//! OAuth 2.0 / OIDC client for a public (PKCE) application
//!
//! Handles the HTTP side of the flow:
//! - Provider discovery (`/.well-known/openid-configuration`)
//! - Authorize and end-session URL building
//! - Authorization code exchange and refresh grants
//! - Userinfo lookup

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::AuthError;
use super::pkce::CHALLENGE_METHOD;
use super::traits::OAuthClientTrait;
use super::types::{
    AuthorizationRequest, OAuthConfig, OAuthErrorBody, ProviderMetadata, TokenResponse,
    UserProfile,
};

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for identity provider calls
#[derive(Debug, Error)]
pub enum OAuthClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// RFC 6749 error body returned with a non-2xx status
    #[error("OAuth error ({status}): {body}")]
    OAuth { status: u16, body: OAuthErrorBody },

    /// Non-2xx status without a parsable OAuth error body
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl OAuthClientError {
    /// HTTP status of the failed response, if one was received.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::OAuth { status, .. } | Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Request(_) | Self::InvalidResponse(_) => None,
        }
    }
}

/// HTTP client bound to one provider and one client registration
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    config: OAuthConfig,
    metadata: ProviderMetadata,
}

impl OAuthClient {
    /// Build a client from known endpoints.
    ///
    /// # Errors
    /// Returns `OAuthClientError::Request` if the HTTP client cannot be built.
    pub fn new(config: OAuthConfig, metadata: ProviderMetadata) -> Result<Self, OAuthClientError> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self::with_http_client(config, metadata, http))
    }

    #[must_use]
    pub fn with_http_client(config: OAuthConfig, metadata: ProviderMetadata, http: Client) -> Self {
        Self { http, config, metadata }
    }

    /// Discover the provider endpoints from the issuer and build a client.
    ///
    /// # Errors
    /// Returns `AuthError::Discovery` when the document cannot be fetched or
    /// parsed.
    pub async fn discover(config: OAuthConfig) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Discovery(e.to_string()))?;
        let metadata = ProviderMetadata::discover(&http, &config.issuer).await?;
        Ok(Self::with_http_client(config, metadata, http))
    }

    #[must_use]
    pub const fn config(&self) -> &OAuthConfig {
        &self.config
    }

    #[must_use]
    pub const fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn post_form(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, OAuthClientError> {
        let response =
            self.http.post(self.metadata.token_endpoint.clone()).form(params).send().await?;
        let response = ensure_success(response).await?;
        response.json().await.map_err(|e| OAuthClientError::InvalidResponse(e.to_string()))
    }
}

impl ProviderMetadata {
    /// Fetch `{issuer}/.well-known/openid-configuration`.
    ///
    /// # Errors
    /// Returns `AuthError::Discovery` on transport failure, non-2xx status,
    /// or a document missing the required endpoints.
    #[instrument(skip(http), fields(issuer = %issuer))]
    pub async fn discover(http: &Client, issuer: &Url) -> Result<Self, AuthError> {
        let url = discovery_url(issuer)?;
        debug!(url = %url, "fetching provider metadata");

        let response = http.get(url).send().await.map_err(|e| AuthError::Discovery(e.to_string()))?;
        let response =
            ensure_success(response).await.map_err(|e| AuthError::Discovery(e.to_string()))?;
        response.json::<Self>().await.map_err(|e| AuthError::Discovery(e.to_string()))
    }
}

fn discovery_url(issuer: &Url) -> Result<Url, AuthError> {
    let mut base = issuer.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(DISCOVERY_PATH).map_err(|e| AuthError::Discovery(e.to_string()))
}

/// Append the authorize parameters to `endpoint`, keeping any query it
/// already carries.
fn with_query(endpoint: &Url, params: &[(&str, &str)]) -> Url {
    let encoded = params
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    let mut url = endpoint.clone();
    let query = match endpoint.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
        _ => encoded,
    };
    url.set_query(Some(&query));
    url
}

async fn ensure_success(response: Response) -> Result<Response, OAuthClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "identity provider returned an error status");
    match serde_json::from_str::<OAuthErrorBody>(&body) {
        Ok(body) => Err(OAuthClientError::OAuth { status: status.as_u16(), body }),
        Err(_) => Err(OAuthClientError::UnexpectedStatus { status: status.as_u16(), body }),
    }
}

#[async_trait]
impl OAuthClientTrait for OAuthClient {
    fn authorization_url(&self, request: &AuthorizationRequest) -> Url {
        let scope = self.config.scope_string();
        with_query(
            &self.metadata.authorization_endpoint,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("code_challenge", request.code_challenge.as_str()),
                ("code_challenge_method", CHALLENGE_METHOD),
                ("state", request.state.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ],
        )
    }

    fn end_session_url(&self) -> Url {
        match &self.metadata.end_session_endpoint {
            Some(endpoint) => {
                let mut url = endpoint.clone();
                url.query_pairs_mut()
                    .append_pair("client_id", &self.config.client_id)
                    .append_pair("post_logout_redirect_uri", self.config.post_logout_redirect_uri.as_str());
                url
            }
            None => self.config.post_logout_redirect_uri.clone(),
        }
    }

    #[instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, OAuthClientError> {
        debug!("exchanging authorization code");
        self.post_form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .await
    }

    #[instrument(skip_all)]
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, OAuthClientError> {
        debug!("refreshing access token");
        self.post_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ])
        .await
    }

    #[instrument(skip_all)]
    async fn fetch_userinfo(&self, access_token: &str) -> Result<Option<UserProfile>, OAuthClientError> {
        let Some(endpoint) = &self.metadata.userinfo_endpoint else {
            return Ok(None);
        };

        let response = self.http.get(endpoint.clone()).bearer_auth(access_token).send().await?;
        let response = ensure_success(response).await?;
        let profile = response
            .json::<UserProfile>()
            .await
            .map_err(|e| OAuthClientError::InvalidResponse(e.to_string()))?;
        Ok(Some(profile))
    }
}
