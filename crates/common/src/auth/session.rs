//! Session state machine
//!
//! ```text
//! Anonymous --login--> PendingCallback --callback ok--> Authenticated
//!     ^                      |                              |
//!     |                callback failure          expiry: renew ok -> Authenticated
//!     +----------------------+------------ renew failure | logout
//! ```
//!
//! `SessionManager` exclusively owns the [`Session`]. Every committed
//! mutation is persisted through the [`AuthStore`] and then delivered to
//! subscribers, in order, before the mutating call returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::client::OAuthClientError;
use super::error::AuthError;
use super::store::{AuthStore, StateStore, StoreError, StoreScope};
use super::traits::{Navigator, OAuthClientTrait};
use super::types::{
    AuthSnapshot, AuthState, AuthorizationRequest, CallbackParams, OAuthConfig, Session,
    TokenResponse, UserProfile,
};

/// Authorization requests older than this are pruned when a new login starts.
pub const AUTH_REQUEST_MAX_AGE: Duration = Duration::from_secs(600);

type Listener = Arc<dyn Fn(&AuthState) + Send + Sync>;

struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
    /// Held across commit + delivery so listeners observe mutations in
    /// commit order. Reentrant: a listener may call back into the manager.
    delivery: ReentrantMutex<()>,
}

impl ListenerRegistry {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
            delivery: ReentrantMutex::new(()),
        }
    }

    fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }

    fn notify(&self, state: &AuthState) {
        let listeners: Vec<Listener> =
            self.listeners.lock().iter().map(|(_, listener)| Arc::clone(listener)).collect();
        for listener in listeners {
            listener(state);
        }
    }
}

/// Handle returned by [`SessionManager::subscribe`]; unregisters on drop.
#[must_use = "dropping the subscription unregisters the listener"]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

struct Inner {
    config: OAuthConfig,
    client: Arc<dyn OAuthClientTrait>,
    store: AuthStore,
    navigator: Arc<dyn Navigator>,
    session: RwLock<Option<Session>>,
    listeners: Arc<ListenerRegistry>,
    callback_in_flight: AtomicBool,
    renewing: AtomicBool,
    renew_lock: tokio::sync::Mutex<()>,
}

/// Clears the callback in-flight flag when the exchange settles, including
/// when the exchange task is aborted.
struct CallbackGuard(Arc<Inner>);

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.0.callback_in_flight.store(false, Ordering::Release);
    }
}

struct BusyFlag<'a>(&'a AtomicBool);

impl<'a> BusyFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Inner {
    fn current(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Replace the in-memory session and deliver `state`.
    fn publish(&self, session: Option<Session>, state: &AuthState) {
        let _delivery = self.listeners.delivery.lock();
        *self.session.write() = session;
        self.listeners.notify(state);
    }

    fn clear_persisted(&self) -> Result<(), StoreError> {
        self.store.clear_session()?;
        self.store.clear_requests()?;
        Ok(())
    }

    /// Drop the session after an unrecoverable failure: `Error`, then
    /// `Anonymous`.
    fn teardown(&self, message: String) {
        let _delivery = self.listeners.delivery.lock();
        if let Err(err) = self.clear_persisted() {
            warn!(error = %err, "failed to clear persisted session during teardown");
        }
        *self.session.write() = None;
        self.listeners.notify(&AuthState::Error { message });
        self.listeners.notify(&AuthState::Anonymous);
    }

    fn report_callback_failure(&self, error: &AuthError) {
        warn!(error = %error, "authorization callback failed");
        let _delivery = self.listeners.delivery.lock();
        self.listeners.notify(&AuthState::Error { message: error.to_string() });
        if self.session.read().is_none() {
            self.listeners.notify(&AuthState::Anonymous);
        }
    }

    async fn complete_login(&self, code: String, request: AuthorizationRequest) -> Result<String, AuthError> {
        let result = self.exchange(&code, &request).await;
        if let Err(err) = &result {
            self.report_callback_failure(err);
        }
        result.map(|()| request.return_path)
    }

    async fn exchange(&self, code: &str, request: &AuthorizationRequest) -> Result<(), AuthError> {
        let response = self
            .client
            .exchange_code(code, &request.code_verifier)
            .await
            .map_err(AuthError::TokenExchange)?;

        let previous = self.current().map(|session| session.profile);
        let profile = self.resolve_profile(&response, previous).await;
        let session = Session::from_token_response(response, profile, Utc::now());

        self.store.save_session(&session)?;
        info!(sub = %session.profile.sub, expires_at = ?session.expires_at, "login completed");
        let state = AuthState::authenticated(&session);
        self.publish(Some(session), &state);
        Ok(())
    }

    /// id_token claims first, then the userinfo endpoint.
    async fn resolve_profile(
        &self,
        response: &TokenResponse,
        previous: Option<UserProfile>,
    ) -> UserProfile {
        if let Some(profile) = response.id_token.as_deref().and_then(UserProfile::from_id_token) {
            return profile;
        }
        match self.client.fetch_userinfo(&response.access_token).await {
            Ok(Some(profile)) => profile,
            Ok(None) => previous.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "userinfo lookup failed");
                previous.unwrap_or_default()
            }
        }
    }

    /// Refresh grant. The caller holds `renew_lock`.
    async fn renew_locked(&self) -> Result<Session, AuthError> {
        let _busy = BusyFlag::raise(&self.renewing);
        let current = self.current().ok_or(AuthError::NotAuthenticated)?;
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::SilentRenew("no refresh token available".to_owned()))?;

        let response = self
            .client
            .refresh_token(&refresh_token)
            .await
            .map_err(|err| AuthError::SilentRenew(err.to_string()))?;

        let profile = response
            .id_token
            .as_deref()
            .and_then(UserProfile::from_id_token)
            .unwrap_or_else(|| current.profile.clone());
        let renewed = current.renewed(response, profile, Utc::now());

        self.commit_renewal(&current, renewed)
    }

    /// Install `renewed` unless the session changed (logout, new login)
    /// while the refresh grant was in flight.
    fn commit_renewal(&self, expected: &Session, renewed: Session) -> Result<Session, AuthError> {
        let _delivery = self.listeners.delivery.lock();
        if self.session.read().as_ref() != Some(expected) {
            debug!("session changed during renewal; discarding refreshed tokens");
            return Err(AuthError::NotAuthenticated);
        }
        self.store.save_session(&renewed)?;
        *self.session.write() = Some(renewed.clone());
        self.listeners.notify(&AuthState::authenticated(&renewed));
        debug!(expires_at = ?renewed.expires_at, "session renewed");
        Ok(renewed)
    }
}

/// OAuth2 Authorization Code + PKCE session manager
///
/// Construct once and share by cloning; clones refer to the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("client_id", &self.inner.config.client_id)
            .field("issuer", &self.inner.config.issuer.as_str())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        config: OAuthConfig,
        client: Arc<dyn OAuthClientTrait>,
        store: Arc<dyn StateStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let scope = StoreScope::new(config.issuer.as_str(), &config.client_id);
        Self {
            inner: Arc::new(Inner {
                config,
                client,
                store: AuthStore::new(store, scope),
                navigator,
                session: RwLock::new(None),
                listeners: Arc::new(ListenerRegistry::new()),
                callback_in_flight: AtomicBool::new(false),
                renewing: AtomicBool::new(false),
                renew_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.inner.config
    }

    /// Restore a persisted session. Returns `true` when one was found.
    ///
    /// A persisted session that cannot be decoded is discarded.
    ///
    /// # Errors
    /// Returns `AuthError::Store` if the backend fails.
    pub fn initialize(&self) -> Result<bool, AuthError> {
        match self.inner.store.load_session() {
            Ok(Some(session)) => {
                info!(sub = %session.profile.sub, "restored persisted session");
                let state = AuthState::authenticated(&session);
                self.inner.publish(Some(session), &state);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(StoreError::Corrupt { key, message }) => {
                warn!(%key, %message, "discarding corrupt persisted session");
                self.inner.store.clear_session()?;
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Start a login and redirect to the authorize endpoint.
    ///
    /// # Errors
    /// Returns `AuthError::Store` if the request cannot be persisted and
    /// `AuthError::Navigation` if the redirect fails.
    #[instrument(skip(self))]
    pub fn login(&self, return_path: &str) -> Result<(), AuthError> {
        let now = Utc::now();
        if let Err(err) = self.inner.store.prune_stale_requests(AUTH_REQUEST_MAX_AGE, now) {
            warn!(error = %err, "failed to prune stale authorization requests");
        }

        let request = AuthorizationRequest::new(return_path, now);
        self.inner.store.save_request(&request)?;

        let url = self.inner.client.authorization_url(&request);
        debug!(host = ?url.host_str(), "redirecting to identity provider");
        self.inner.navigator.redirect(&url)?;
        Ok(())
    }

    /// Complete a login from the identity provider redirect and return the
    /// stored return path.
    ///
    /// The stored request is consumed exactly once, so a replayed or doubled
    /// callback fails with `StateMismatch` without reaching the token
    /// endpoint. The exchange runs on a spawned task: dropping the returned
    /// future does not abort it.
    ///
    /// # Errors
    /// `StateMismatch`, `AuthorizationDenied`, `TokenExchange` or `Store`.
    #[instrument(skip_all)]
    pub async fn handle_callback(&self, params: CallbackParams) -> Result<String, AuthError> {
        let state = params.state.clone().unwrap_or_default();

        if self.inner.callback_in_flight.swap(true, Ordering::AcqRel) {
            debug!("authorization callback already in flight");
            return Err(AuthError::StateMismatch { state });
        }
        let guard = CallbackGuard(Arc::clone(&self.inner));

        let request = match self.inner.store.take_request(&state) {
            Ok(Some(request)) => request,
            Ok(None) => {
                let err = AuthError::StateMismatch { state };
                if self.is_authenticated() {
                    // Replay of a completed login: nothing changed.
                    debug!("callback state already consumed; keeping current session");
                } else {
                    self.inner.report_callback_failure(&err);
                }
                return Err(err);
            }
            Err(err) => {
                let err = AuthError::from(err);
                self.inner.report_callback_failure(&err);
                return Err(err);
            }
        };

        if let Some(error) = params.error {
            let err = AuthError::AuthorizationDenied { error, description: params.error_description };
            self.inner.report_callback_failure(&err);
            return Err(err);
        }

        let Some(code) = params.code.filter(|code| !code.is_empty()) else {
            let err = AuthError::AuthorizationDenied {
                error: "invalid_request".to_owned(),
                description: Some("authorization code missing from callback".to_owned()),
            };
            self.inner.report_callback_failure(&err);
            return Err(err);
        };

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = guard;
            inner.complete_login(code, request).await
        });

        match task.await {
            Ok(result) => result,
            Err(join_err) => Err(AuthError::TokenExchange(OAuthClientError::InvalidResponse(
                format!("token exchange task failed: {join_err}"),
            ))),
        }
    }

    /// Access token for an outgoing request, renewed first when it is within
    /// the renewal threshold of expiry.
    ///
    /// Returns `None` without a session. A failed renewal tears the session
    /// down (`Error`, then `Anonymous`) and also returns `None`. Concurrent
    /// callers share one renewal.
    pub async fn get_access_token(&self) -> Option<String> {
        if let Some(token) = self.fresh_token()? {
            return Some(token);
        }

        let _renewal = self.inner.renew_lock.lock().await;
        if let Some(token) = self.fresh_token()? {
            return Some(token);
        }

        match self.inner.renew_locked().await {
            Ok(session) => Some(session.access_token),
            Err(AuthError::NotAuthenticated) => None,
            Err(err) => {
                warn!(error = %err, "silent renewal failed; ending session");
                self.inner.teardown(err.to_string());
                None
            }
        }
    }

    /// `None` without a session, `Some(None)` when renewal is due.
    fn fresh_token(&self) -> Option<Option<String>> {
        let guard = self.inner.session.read();
        let session = guard.as_ref()?;
        let due = session.needs_renewal(self.inner.config.renew_threshold, Utc::now());
        Some((!due).then(|| session.access_token.clone()))
    }

    /// Run the refresh grant now. Never retried and never tears the session
    /// down; callers decide whether to force a logout.
    ///
    /// # Errors
    /// `NotAuthenticated` without a session, `SilentRenew` when the grant
    /// fails, `Store` if the renewed session cannot be persisted.
    pub async fn renew_silently(&self) -> Result<(), AuthError> {
        let _renewal = self.inner.renew_lock.lock().await;
        self.inner.renew_locked().await.map(|_| ())
    }

    /// Clear the session and redirect to the provider's end-session endpoint.
    ///
    /// Local state is cleared and `Anonymous` delivered even when the store
    /// or the redirect fails.
    ///
    /// # Errors
    /// `Navigation` if the redirect fails, otherwise `Store` if the persisted
    /// state could not be cleared.
    #[instrument(skip(self))]
    pub fn logout(&self) -> Result<(), AuthError> {
        let cleared = self.clear_local();
        let url = self.inner.client.end_session_url();
        self.inner.navigator.redirect(&url)?;
        info!("logged out");
        cleared.map_err(AuthError::from)
    }

    /// End the session locally after the API rejected its token.
    ///
    /// Delivers `Anonymous` without redirecting; the UI decides whether to
    /// start a new login.
    pub fn force_logout(&self) {
        if self.inner.session.read().is_none() {
            return;
        }
        warn!("forcing logout after token rejection");
        if let Err(err) = self.clear_local() {
            warn!(error = %err, "failed to clear persisted session");
        }
    }

    fn clear_local(&self) -> Result<(), StoreError> {
        let _delivery = self.inner.listeners.delivery.lock();
        let cleared = self.inner.clear_persisted();
        self.inner.publish(None, &AuthState::Anonymous);
        cleared
    }

    #[must_use]
    pub fn user_profile(&self) -> Option<UserProfile> {
        self.inner.session.read().as_ref().map(|session| session.profile.clone())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.session.read().is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        let profile = self.user_profile();
        AuthSnapshot {
            is_authenticated: profile.is_some(),
            profile,
            is_loading: self.inner.callback_in_flight.load(Ordering::Acquire)
                || self.inner.renewing.load(Ordering::Acquire),
        }
    }

    /// Register `listener` for every subsequent state change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.add(Arc::new(listener));
        Subscription { registry: Arc::downgrade(&self.inner.listeners), id }
    }
}
