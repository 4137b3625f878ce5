//! OAuth 2.0 / OIDC types
//!
//! Sessions, token responses, provider metadata and the state published to
//! subscribers. Secrets (`access_token`, `refresh_token`, `id_token`,
//! `code_verifier`) are redacted from every `Debug` rendering.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::pkce::PkceChallenge;

const REDACTED: &str = "<redacted>";

/// Identity claims shown to the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserProfile {
    /// Read the profile claims from an id_token payload.
    ///
    /// The signature is not verified: the claims are used for display only
    /// and never for authorization decisions.
    #[must_use]
    pub fn from_id_token(id_token: &str) -> Option<Self> {
        let payload = id_token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let profile: Self = serde_json::from_slice(&bytes).ok()?;
        (!profile.sub.is_empty()).then_some(profile)
    }
}

/// Token endpoint response (RFC 6749 §5.1)
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &REDACTED)
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| REDACTED))
            .field("id_token", &self.id_token.as_ref().map(|_| REDACTED))
            .field("scope", &self.scope)
            .finish()
    }
}

/// The authenticated session, owned by the session manager
///
/// Persisted as JSON under the session key of the issuer and client id. At
/// most one exists per key; renewal overwrites it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// When the access token was issued; absent on sessions persisted by
    /// older builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub profile: UserProfile,
}

impl Session {
    /// Build a session from a fresh token response.
    #[must_use]
    pub fn from_token_response(
        response: TokenResponse,
        profile: UserProfile,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = response
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime));

        Self {
            access_token: response.access_token,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
            expires_at,
            issued_at: Some(now),
            scope: response.scope,
            profile,
        }
    }

    /// Replace the tokens after a refresh grant.
    ///
    /// Providers that do not rotate refresh tokens omit them from the
    /// response, so the previous one is kept. The same applies to the
    /// id_token and scope.
    #[must_use]
    pub fn renewed(&self, response: TokenResponse, profile: UserProfile, now: DateTime<Utc>) -> Self {
        let mut next = Self::from_token_response(response, profile, now);
        if next.refresh_token.is_none() {
            next.refresh_token.clone_from(&self.refresh_token);
        }
        if next.id_token.is_none() {
            next.id_token.clone_from(&self.id_token);
        }
        if next.scope.is_none() {
            next.scope.clone_from(&self.scope);
        }
        next
    }

    /// True when the access token expires within the renewal window of
    /// `now`.
    ///
    /// The window is `threshold`, capped at half the token lifetime so a
    /// short-lived token is not due the moment it is issued. Sessions
    /// without an expiry never need renewal.
    #[must_use]
    pub fn needs_renewal(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let Ok(mut window) = chrono::Duration::from_std(threshold) else {
            return true;
        };
        if let Some(issued_at) = self.issued_at {
            window = window.min((expires_at - issued_at) / 2);
        }
        now.checked_add_signed(window).map_or(true, |deadline| deadline >= expires_at)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    #[must_use]
    pub fn seconds_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|expires_at| (expires_at - now).num_seconds())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &REDACTED)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| REDACTED))
            .field("id_token", &self.id_token.as_ref().map(|_| REDACTED))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .field("scope", &self.scope)
            .field("profile", &self.profile)
            .finish()
    }
}

/// An in-flight login attempt, persisted until its callback consumes it
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
    pub return_path: String,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationRequest {
    /// Fresh verifier, challenge and state for one login.
    #[must_use]
    pub fn new(return_path: impl Into<String>, now: DateTime<Utc>) -> Self {
        let PkceChallenge { code_verifier, code_challenge, state } = PkceChallenge::generate();
        Self { code_verifier, code_challenge, state, return_path: return_path.into(), created_at: now }
    }

    #[must_use]
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(max_age).map_or(false, |max_age| now - self.created_at > max_age)
    }
}

impl fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("code_verifier", &REDACTED)
            .field("code_challenge", &self.code_challenge)
            .field("state", &self.state)
            .field("return_path", &self.return_path)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Query parameters of the redirect back from the identity provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self::from_pairs(url.query_pairs())
    }

    /// Parse a raw query string, with or without the leading `?`.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    fn from_pairs<'a>(pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }
}

/// Static client settings for one identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub issuer: Url,
    pub client_id: String,
    pub redirect_uri: Url,
    pub post_logout_redirect_uri: Url,
    pub scopes: Vec<String>,
    /// Renew when the access token expires within this window.
    pub renew_threshold: Duration,
}

impl OAuthConfig {
    #[must_use]
    pub fn new(
        issuer: Url,
        client_id: impl Into<String>,
        redirect_uri: Url,
        post_logout_redirect_uri: Url,
    ) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            redirect_uri,
            post_logout_redirect_uri,
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
            renew_threshold: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub const fn with_renew_threshold(mut self, threshold: Duration) -> Self {
        self.renew_threshold = threshold;
        self
    }

    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// OIDC provider endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default)]
    pub end_session_endpoint: Option<Url>,
}

/// OAuth error response body (RFC 6749 §5.2)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl fmt::Display for OAuthErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => f.write_str(&self.error),
        }
    }
}

/// Session state delivered to subscribers after every committed mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated { profile: UserProfile, expires_at: Option<DateTime<Utc>> },
    Error { message: String },
}

impl AuthState {
    pub(crate) fn authenticated(session: &Session) -> Self {
        Self::Authenticated { profile: session.profile.clone(), expires_at: session.expires_at }
    }
}

/// What a rendering layer needs to draw the session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub is_authenticated: bool,
    pub profile: Option<UserProfile>,
    pub is_loading: bool,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn token_response(json: serde_json::Value) -> TokenResponse {
        serde_json::from_value(json).unwrap()
    }

    fn id_token(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn profile_decodes_from_id_token_payload() {
        let token = id_token(&serde_json::json!({
            "sub": "user-1",
            "email": "ada@example.com",
            "name": "Ada",
            "aud": "meridian-web"
        }));

        let profile = UserProfile::from_id_token(&token).unwrap();
        assert_eq!(profile.sub, "user-1");
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
        assert_eq!(profile.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn malformed_id_token_yields_none() {
        assert!(UserProfile::from_id_token("not-a-jwt").is_none());
        assert!(UserProfile::from_id_token("a.!!!.c").is_none());
        assert!(UserProfile::from_id_token(&id_token(&serde_json::json!({ "sub": "" }))).is_none());
    }

    #[test]
    fn session_expiry_and_renewal_window() {
        let response = token_response(serde_json::json!({ "access_token": "A", "expires_in": 300 }));
        let session = Session::from_token_response(response, UserProfile::default(), ts(1_000));

        assert_eq!(session.token_type, "Bearer");
        assert_eq!(session.expires_at, Some(ts(1_300)));
        assert!(!session.needs_renewal(Duration::from_secs(60), ts(1_200)));
        assert!(session.needs_renewal(Duration::from_secs(60), ts(1_240)));
        assert!(!session.is_expired(ts(1_299)));
        assert!(session.is_expired(ts(1_300)));
        assert_eq!(session.seconds_until_expiry(ts(1_100)), Some(200));
    }

    #[test]
    fn short_lived_token_is_not_due_at_issue() {
        let response = token_response(serde_json::json!({ "access_token": "A", "expires_in": 45 }));
        let session = Session::from_token_response(response, UserProfile::default(), ts(1_000));

        assert_eq!(session.issued_at, Some(ts(1_000)));
        assert!(!session.needs_renewal(Duration::from_secs(60), ts(1_000)));
        assert!(!session.needs_renewal(Duration::from_secs(60), ts(1_020)));
        assert!(session.needs_renewal(Duration::from_secs(60), ts(1_023)));
    }

    #[test]
    fn session_without_issue_time_uses_full_threshold() {
        let response = token_response(serde_json::json!({ "access_token": "A", "expires_in": 45 }));
        let mut session = Session::from_token_response(response, UserProfile::default(), ts(1_000));
        session.issued_at = None;

        assert!(session.needs_renewal(Duration::from_secs(60), ts(1_000)));
    }

    #[test]
    fn session_without_expiry_never_renews() {
        let response = token_response(serde_json::json!({ "access_token": "A" }));
        let session = Session::from_token_response(response, UserProfile::default(), ts(0));
        assert!(!session.needs_renewal(Duration::from_secs(60), ts(1_000_000)));
    }

    #[test]
    fn renewal_keeps_unrotated_refresh_token() {
        let first = Session::from_token_response(
            token_response(serde_json::json!({
                "access_token": "A",
                "refresh_token": "R1",
                "scope": "openid",
                "expires_in": 60
            })),
            UserProfile::default(),
            ts(0),
        );
        let renewed = first.renewed(
            token_response(serde_json::json!({ "access_token": "B", "expires_in": 60 })),
            first.profile.clone(),
            ts(50),
        );

        assert_eq!(renewed.access_token, "B");
        assert_eq!(renewed.refresh_token.as_deref(), Some("R1"));
        assert_eq!(renewed.scope.as_deref(), Some("openid"));
        assert_eq!(renewed.expires_at, Some(ts(110)));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let session = Session::from_token_response(
            token_response(serde_json::json!({ "access_token": "secret-A", "refresh_token": "secret-R" })),
            UserProfile::default(),
            ts(0),
        );
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-A"));
        assert!(!rendered.contains("secret-R"));
    }

    #[test]
    fn callback_params_parse_from_url_and_query() {
        let url = Url::parse("https://app.example.com/callback?code=abc&state=s%201").unwrap();
        let params = CallbackParams::from_url(&url);
        assert_eq!(params.code.as_deref(), Some("abc"));
        assert_eq!(params.state.as_deref(), Some("s 1"));

        let denied = CallbackParams::from_query("?error=access_denied&error_description=User+cancelled&state=x");
        assert_eq!(denied.error.as_deref(), Some("access_denied"));
        assert_eq!(denied.error_description.as_deref(), Some("User cancelled"));
        assert!(denied.code.is_none());
    }

    #[test]
    fn authorization_request_staleness() {
        let request = AuthorizationRequest::new("/jobs", ts(0));
        assert!(!request.is_stale(Duration::from_secs(600), ts(600)));
        assert!(request.is_stale(Duration::from_secs(600), ts(601)));
        assert_eq!(request.return_path, "/jobs");
    }
}
