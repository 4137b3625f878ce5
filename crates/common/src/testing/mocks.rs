//! Mock implementations of the auth seams
//!
//! Provides scripted doubles for driving the session manager in tests.

// Allow missing error/panic docs for test mocks - they are designed to be simple
// and errors are clearly indicated by their return types
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::auth::{
    AuthorizationRequest, NavigationError, Navigator, OAuthClientError, OAuthClientTrait,
    OAuthErrorBody, TokenResponse, UserProfile,
};

type Scripted = Mutex<VecDeque<Result<TokenResponse, OAuthClientError>>>;

/// Navigator that records every redirect instead of performing it
///
/// # Examples
///
/// ```
/// use meridian_common::auth::Navigator;
/// use meridian_common::testing::RecordingNavigator;
///
/// let navigator = RecordingNavigator::new();
/// navigator.redirect(&"https://id.example.com/authorize".parse().unwrap()).unwrap();
/// assert_eq!(navigator.redirects().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    redirects: Mutex<Vec<Url>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent redirects fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(message.into());
    }

    #[must_use]
    pub fn redirects(&self) -> Vec<Url> {
        self.redirects.lock().unwrap().clone()
    }

    #[must_use]
    pub fn last(&self) -> Option<Url> {
        self.redirects.lock().unwrap().last().cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, url: &Url) -> Result<(), NavigationError> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(NavigationError(message));
        }
        self.redirects.lock().unwrap().push(url.clone());
        Ok(())
    }
}

/// Identity provider double with scripted token responses
///
/// Exchange and refresh calls pop the next scripted result; an empty script
/// yields `OAuthClientError::InvalidResponse`.
#[derive(Debug)]
pub struct MockOAuthClient {
    authorize_endpoint: Url,
    end_session_endpoint: Url,
    exchanges: Scripted,
    refreshes: Scripted,
    userinfo: Mutex<Option<UserProfile>>,
    refresh_delay: Mutex<Option<Duration>>,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    last_exchange: Mutex<Option<(String, String)>>,
    last_refresh_token: Mutex<Option<String>>,
}

impl MockOAuthClient {
    /// Create a new mock OAuth client with empty scripts.
    pub fn new() -> Self {
        Self {
            authorize_endpoint: Url::parse("https://idp.test/authorize").unwrap(),
            end_session_endpoint: Url::parse("https://idp.test/logout").unwrap(),
            exchanges: Mutex::new(VecDeque::new()),
            refreshes: Mutex::new(VecDeque::new()),
            userinfo: Mutex::new(None),
            refresh_delay: Mutex::new(None),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            last_exchange: Mutex::new(None),
            last_refresh_token: Mutex::new(None),
        }
    }

    /// Token response with the given access token, lifetime and refresh token.
    #[must_use]
    pub fn token(access_token: &str, expires_in: Option<i64>, refresh_token: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: access_token.to_owned(),
            token_type: "Bearer".to_owned(),
            expires_in,
            refresh_token: refresh_token.map(str::to_owned),
            id_token: None,
            scope: Some("openid profile email".to_owned()),
        }
    }

    fn oauth_error(status: u16, error: &str) -> OAuthClientError {
        OAuthClientError::OAuth {
            status,
            body: OAuthErrorBody { error: error.to_owned(), error_description: None },
        }
    }

    pub fn push_exchange(&self, response: TokenResponse) {
        self.exchanges.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_exchange_error(&self, status: u16, error: &str) {
        self.exchanges.lock().unwrap().push_back(Err(Self::oauth_error(status, error)));
    }

    pub fn push_refresh(&self, response: TokenResponse) {
        self.refreshes.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_refresh_error(&self, status: u16, error: &str) {
        self.refreshes.lock().unwrap().push_back(Err(Self::oauth_error(status, error)));
    }

    /// Profile returned by `fetch_userinfo`.
    pub fn set_userinfo(&self, profile: UserProfile) {
        *self.userinfo.lock().unwrap() = Some(profile);
    }

    /// Delay every refresh grant by `delay` (tokio time).
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// `(code, code_verifier)` of the most recent exchange.
    #[must_use]
    pub fn last_exchange(&self) -> Option<(String, String)> {
        self.last_exchange.lock().unwrap().clone()
    }

    #[must_use]
    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().unwrap().clone()
    }

    fn next(script: &Scripted) -> Result<TokenResponse, OAuthClientError> {
        script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OAuthClientError::InvalidResponse("no scripted response".into())))
    }
}

impl Default for MockOAuthClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuthClientTrait for MockOAuthClient {
    fn authorization_url(&self, request: &AuthorizationRequest) -> Url {
        let mut url = self.authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("code_challenge", &request.code_challenge)
            .append_pair("state", &request.state);
        url
    }

    fn end_session_url(&self) -> Url {
        self.end_session_endpoint.clone()
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, OAuthClientError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_exchange.lock().unwrap() = Some((code.to_owned(), code_verifier.to_owned()));
        Self::next(&self.exchanges)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, OAuthClientError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.to_owned());
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::next(&self.refreshes)
    }

    async fn fetch_userinfo(&self, _access_token: &str) -> Result<Option<UserProfile>, OAuthClientError> {
        Ok(self.userinfo.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn navigator_records_and_fails_on_demand() {
        let navigator = RecordingNavigator::new();
        let url = Url::parse("https://idp.test/authorize").unwrap();
        navigator.redirect(&url).unwrap();
        assert_eq!(navigator.last(), Some(url.clone()));

        navigator.fail_with("window closed");
        assert_eq!(navigator.redirect(&url).unwrap_err().0, "window closed");
        assert_eq!(navigator.redirects().len(), 1);
    }

    #[tokio::test]
    async fn scripted_responses_are_consumed_in_order() {
        let client = MockOAuthClient::new();
        client.push_exchange(MockOAuthClient::token("A", Some(60), None));
        client.push_exchange_error(400, "invalid_grant");

        assert_eq!(client.exchange_code("c1", "v1").await.unwrap().access_token, "A");
        assert_eq!(client.exchange_code("c2", "v2").await.unwrap_err().status(), Some(400));
        assert!(matches!(
            client.exchange_code("c3", "v3").await,
            Err(OAuthClientError::InvalidResponse(_))
        ));
        assert_eq!(client.exchange_calls(), 3);
        assert_eq!(client.last_exchange(), Some(("c3".into(), "v3".into())));
    }

    #[test]
    fn authorization_url_carries_state() {
        let client = MockOAuthClient::new();
        let request = AuthorizationRequest::new("/", Utc::now());
        let url = client.authorization_url(&request);
        assert!(url.query_pairs().any(|(k, v)| k == "state" && v == request.state.as_str()));
    }
}
