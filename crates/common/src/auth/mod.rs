//! OAuth 2.0 Authorization Code + PKCE session core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ SessionManager  │  state machine, renewal, subscriptions
//! └────────┬────────┘
//!          │
//!          ├──► OAuthClientTrait   (OAuthClient: discovery, token grants)
//!          ├──► AuthStore          (sessions + in-flight requests)
//!          │         │
//!          │         └──► StateStore  (MemoryStateStore | KeychainStateStore)
//!          │
//!          ├──► Navigator          (full-page redirect, supplied by the host)
//!          │
//!          └──► PKCE utilities     (verifier, S256 challenge, state)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use meridian_common::auth::{
//!     CallbackParams, MemoryStateStore, Navigator, NavigationError, OAuthClient, OAuthConfig,
//!     SessionManager,
//! };
//! use url::Url;
//!
//! struct Browser;
//!
//! impl Navigator for Browser {
//!     fn redirect(&self, url: &Url) -> Result<(), NavigationError> {
//!         println!("open {url}");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OAuthConfig::new(
//!         "https://id.example.com/realms/meridian".parse()?,
//!         "meridian-web",
//!         "https://app.example.com/callback".parse()?,
//!         "https://app.example.com/".parse()?,
//!     );
//!     let client = OAuthClient::discover(config.clone()).await?;
//!     let manager = SessionManager::new(
//!         config,
//!         Arc::new(client),
//!         Arc::new(MemoryStateStore::new()),
//!         Arc::new(Browser),
//!     );
//!
//!     manager.login("/jobs")?;
//!     // ...the provider redirects back to the callback URL...
//!     let callback: Url = "https://app.example.com/callback?code=abc&state=xyz".parse()?;
//!     let return_path = manager.handle_callback(CallbackParams::from_url(&callback)).await?;
//!     println!("signed in, continue at {return_path}");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod keychain;
pub mod pkce;
pub mod session;
pub mod store;
pub mod traits;
pub mod types;

pub use client::{OAuthClient, OAuthClientError};
pub use error::{AuthError, CallbackFailurePolicy};
pub use keychain::KeychainStateStore;
pub use pkce::{
    generate_code_challenge, generate_code_verifier, generate_state, validate_state, PkceChallenge,
    CHALLENGE_METHOD,
};
pub use session::{SessionManager, Subscription, AUTH_REQUEST_MAX_AGE};
pub use store::{AuthStore, MemoryStateStore, StateStore, StoreError, StoreScope};
pub use traits::{NavigationError, Navigator, OAuthClientTrait};
pub use types::{
    AuthSnapshot, AuthState, AuthorizationRequest, CallbackParams, OAuthConfig, OAuthErrorBody,
    ProviderMetadata, Session, TokenResponse, UserProfile,
};
