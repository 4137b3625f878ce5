//! Persistent state store for sessions and in-flight authorization requests
//!
//! [`StateStore`] is a synchronous string-keyed store, so a read-modify-write
//! of one key never spans an await point. [`AuthStore`] layers the two
//! namespaces on top of it:
//!
//! ```text
//! meridian.session.{issuer}:{client_id}                 -> Session (JSON)
//! meridian.auth_request.{issuer}:{client_id}.{state}    -> AuthorizationRequest (JSON)
//! meridian.auth_request_index.{issuer}:{client_id}      -> [state, ...] (JSON)
//! ```
//!
//! The index exists because OS keychains cannot enumerate entries by prefix.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{AuthorizationRequest, Session};

/// Failures of the underlying store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store backend failure: {0}")]
    Backend(String),

    /// An entry exists but cannot be decoded.
    #[error("corrupt state store entry {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("failed to encode state store entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Synchronous string-keyed storage
pub trait StateStore: Send + Sync {
    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Read and remove `key`.
    ///
    /// Backends that can do so atomically override this.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.get(key)?;
        if value.is_some() {
            self.remove(key)?;
        }
        Ok(value)
    }
}

/// Process-local store, the equivalent of browser session storage
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Sorted snapshot of the stored keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().remove(key))
    }
}

/// Key layout for one issuer and client id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreScope {
    session_key: String,
    request_prefix: String,
    index_key: String,
}

impl StoreScope {
    #[must_use]
    pub fn new(issuer: &str, client_id: &str) -> Self {
        let scope = format!("{}:{client_id}", issuer.trim_end_matches('/'));
        Self {
            session_key: format!("meridian.session.{scope}"),
            request_prefix: format!("meridian.auth_request.{scope}."),
            index_key: format!("meridian.auth_request_index.{scope}"),
        }
    }

    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    #[must_use]
    pub fn request_key(&self, state: &str) -> String {
        format!("{}{state}", self.request_prefix)
    }
}

/// Typed access to sessions and authorization requests
pub struct AuthStore {
    backend: Arc<dyn StateStore>,
    scope: StoreScope,
    index_lock: Mutex<()>,
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore").field("scope", &self.scope).finish_non_exhaustive()
    }
}

impl AuthStore {
    pub fn new(backend: Arc<dyn StateStore>, scope: StoreScope) -> Self {
        Self { backend, scope, index_lock: Mutex::new(()) }
    }

    #[must_use]
    pub const fn scope(&self) -> &StoreScope {
        &self.scope
    }

    /// # Errors
    /// Returns `StoreError::Corrupt` when the stored JSON cannot be decoded.
    pub fn load_session(&self) -> Result<Option<Session>, StoreError> {
        let key = self.scope.session_key();
        self.backend.get(key)?.map(|raw| decode(key, &raw)).transpose()
    }

    /// # Errors
    /// Returns `StoreError` if encoding or the backend fails.
    pub fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let raw = serde_json::to_string(session)?;
        self.backend.set(self.scope.session_key(), &raw)
    }

    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    pub fn clear_session(&self) -> Result<(), StoreError> {
        self.backend.remove(self.scope.session_key())
    }

    /// Persist a request keyed by its state.
    ///
    /// # Errors
    /// Returns `StoreError` if encoding or the backend fails.
    pub fn save_request(&self, request: &AuthorizationRequest) -> Result<(), StoreError> {
        let raw = serde_json::to_string(request)?;
        self.backend.set(&self.scope.request_key(&request.state), &raw)?;

        let _guard = self.index_lock.lock();
        let mut states = self.read_index()?;
        if !states.iter().any(|state| state == &request.state) {
            states.push(request.state.clone());
        }
        self.write_index(&states)
    }

    /// Consume the request for `state`. A second call for the same state
    /// returns `Ok(None)`.
    ///
    /// # Errors
    /// Returns `StoreError::Corrupt` when the stored request cannot be decoded
    /// (the entry is removed either way).
    pub fn take_request(&self, state: &str) -> Result<Option<AuthorizationRequest>, StoreError> {
        let key = self.scope.request_key(state);
        let raw = self.backend.take(&key)?;
        self.forget_states(&[state])?;
        raw.map(|raw| decode(&key, &raw)).transpose()
    }

    /// Remove every pending request. Returns how many were removed.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    pub fn clear_requests(&self) -> Result<usize, StoreError> {
        let _guard = self.index_lock.lock();
        let states = self.read_index()?;
        for state in &states {
            self.backend.remove(&self.scope.request_key(state))?;
        }
        self.backend.remove(&self.scope.index_key)?;
        Ok(states.len())
    }

    /// Remove requests older than `max_age`, and any that cannot be decoded.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    pub fn prune_stale_requests(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let _guard = self.index_lock.lock();
        let states = self.read_index()?;
        let mut kept = Vec::with_capacity(states.len());
        let mut pruned = 0;

        for state in states {
            let key = self.scope.request_key(&state);
            let stale = match self.backend.get(&key)? {
                Some(raw) => match decode::<AuthorizationRequest>(&key, &raw) {
                    Ok(request) => request.is_stale(max_age, now),
                    Err(err) => {
                        warn!(error = %err, "dropping undecodable authorization request");
                        true
                    }
                },
                None => {
                    pruned += 1;
                    continue;
                }
            };

            if stale {
                self.backend.remove(&key)?;
                pruned += 1;
            } else {
                kept.push(state);
            }
        }

        self.write_index(&kept)?;
        if pruned > 0 {
            debug!(pruned, "pruned stale authorization requests");
        }
        Ok(pruned)
    }

    fn forget_states(&self, forgotten: &[&str]) -> Result<(), StoreError> {
        let _guard = self.index_lock.lock();
        let mut states = self.read_index()?;
        let before = states.len();
        states.retain(|state| !forgotten.contains(&state.as_str()));
        if states.len() == before {
            return Ok(());
        }
        self.write_index(&states)
    }

    fn read_index(&self) -> Result<Vec<String>, StoreError> {
        match self.backend.get(&self.scope.index_key)? {
            Some(raw) => Ok(decode(&self.scope.index_key, &raw).unwrap_or_else(|err| {
                warn!(error = %err, "resetting corrupt authorization request index");
                Vec::new()
            })),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, states: &[String]) -> Result<(), StoreError> {
        if states.is_empty() {
            return self.backend.remove(&self.scope.index_key);
        }
        let raw = serde_json::to_string(states)?;
        self.backend.set(&self.scope.index_key, &raw)
    }
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::Corrupt { key: key.to_owned(), message: e.to_string() })
}
