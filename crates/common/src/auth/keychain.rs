//! Platform keychain backend for [`StateStore`]
//!
//! Each state key becomes one keychain account under a fixed service name
//! (macOS Keychain, Windows Credential Manager, Linux Secret Service).
//! Desktop shells use this so a session survives restarts.

use keyring::Entry;
use tracing::debug;

use super::store::{StateStore, StoreError};

pub struct KeychainStateStore {
    service: String,
}

impl KeychainStateStore {
    /// # Examples
    /// ```
    /// use meridian_common::auth::KeychainStateStore;
    ///
    /// let store = KeychainStateStore::new("Meridian.session");
    /// assert_eq!(store.service(), "Meridian.session");
    /// ```
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service, key)
            .map_err(|e| StoreError::Backend(format!("failed to open keychain entry {key}: {e}")))
    }
}

impl std::fmt::Debug for KeychainStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainStateStore").field("service", &self.service).finish()
    }
}

impl StateStore for KeychainStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("failed to read {key}: {e}"))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        debug!(service = %self.service, key = %key, "writing keychain entry");
        self.entry(key)?
            .set_password(value)
            .map_err(|e| StoreError::Backend(format!("failed to write {key}: {e}")))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Backend(format!("failed to delete {key}: {e}"))),
        }
    }
}
