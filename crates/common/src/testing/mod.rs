//! Testing utilities and helpers
//!
//! In-memory doubles for the auth seams:
//! - **[`MockOAuthClient`]**: identity provider with scripted token responses
//! - **[`RecordingNavigator`]**: records redirects instead of performing them
//! - **[`MemoryStateStore`]**: process-local state store
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use meridian_common::auth::{OAuthConfig, SessionManager};
//! use meridian_common::testing::{MemoryStateStore, MockOAuthClient, RecordingNavigator};
//!
//! let config = OAuthConfig::new(
//!     "https://id.example.com".parse().unwrap(),
//!     "meridian-web",
//!     "https://app.example.com/callback".parse().unwrap(),
//!     "https://app.example.com/".parse().unwrap(),
//! );
//! let navigator = Arc::new(RecordingNavigator::new());
//! let manager = SessionManager::new(
//!     config,
//!     Arc::new(MockOAuthClient::new()),
//!     Arc::new(MemoryStateStore::new()),
//!     navigator.clone(),
//! );
//!
//! manager.login("/jobs").unwrap();
//! assert_eq!(navigator.redirects().len(), 1);
//! ```

pub mod mocks;

pub use mocks::{MockOAuthClient, RecordingNavigator};

pub use crate::auth::MemoryStateStore;
