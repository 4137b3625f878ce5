//! Configuration structures
//!
//! Loaded by `meridian_infra::config::loader` from environment variables or a
//! TOML/JSON file. Every section except `auth.issuer`, `auth.client_id`, the
//! redirect URIs and `api.base_url` has a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_MAX_CONCURRENCY,
    DEFAULT_RENEW_THRESHOLD_SECS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_RETRY_JITTER, DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_SCOPES, DEFAULT_TRACE_HEADER,
};
use crate::errors::{MeridianError, Result};

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub poller: PollerConfig,
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns `MeridianError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.auth.validate()?;
        self.api.validate()?;
        self.poller.validate()
    }
}

/// Identity provider settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub issuer: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Renew the access token when it expires within this many seconds.
    #[serde(default = "default_renew_threshold_secs")]
    pub renew_threshold_secs: u64,
    /// Explicit endpoints. When absent they are discovered from the issuer.
    #[serde(default)]
    pub endpoints: Option<EndpointConfig>,
}

impl AuthConfig {
    fn validate(&self) -> Result<()> {
        require_url("auth.issuer", &self.issuer)?;
        require_url("auth.redirect_uri", &self.redirect_uri)?;
        require_url("auth.post_logout_redirect_uri", &self.post_logout_redirect_uri)?;
        if self.client_id.trim().is_empty() {
            return Err(MeridianError::Config("auth.client_id must not be empty".into()));
        }
        if !self.scopes.iter().any(|scope| scope == "openid") {
            return Err(MeridianError::Config("auth.scopes must include \"openid\"".into()));
        }
        if let Some(endpoints) = &self.endpoints {
            endpoints.validate()?;
        }
        Ok(())
    }
}

/// Statically configured OIDC endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

impl EndpointConfig {
    fn validate(&self) -> Result<()> {
        require_url("auth.endpoints.authorization_endpoint", &self.authorization_endpoint)?;
        require_url("auth.endpoints.token_endpoint", &self.token_endpoint)?;
        if let Some(userinfo) = &self.userinfo_endpoint {
            require_url("auth.endpoints.userinfo_endpoint", userinfo)?;
        }
        if let Some(end_session) = &self.end_session_endpoint {
            require_url("auth.endpoints.end_session_endpoint", end_session)?;
        }
        Ok(())
    }
}

/// Remote API gateway settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_trace_header")]
    pub trace_header: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl ApiConfig {
    fn validate(&self) -> Result<()> {
        require_url("api.base_url", &self.base_url)?;
        if self.trace_header.trim().is_empty() {
            return Err(MeridianError::Config("api.trace_header must not be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(MeridianError::Config("api.timeout_ms must be positive".into()));
        }
        self.retry.validate()
    }
}

/// Retry budget and backoff shape for gateway calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Proportional jitter, a fraction in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            jitter: DEFAULT_RETRY_JITTER,
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(MeridianError::Config(
                "api.retry.base_delay_ms must not exceed api.retry.max_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(MeridianError::Config("api.retry.jitter must be within [0, 1]".into()));
        }
        Ok(())
    }
}

/// Job polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
    pub max_concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval_ms: DEFAULT_POLL_INTERVAL_MS, max_concurrency: DEFAULT_POLL_MAX_CONCURRENCY }
    }
}

impl PollerConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(MeridianError::Config("poller.max_concurrency must be positive".into()));
        }
        if self.interval_ms == 0 {
            return Err(MeridianError::Config("poller.interval_ms must be positive".into()));
        }
        Ok(())
    }
}

fn require_url(field: &str, value: &str) -> Result<()> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| MeridianError::Config(format!("{field} is not a valid URL ({value}): {e}")))
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|scope| (*scope).to_owned()).collect()
}

const fn default_renew_threshold_secs() -> u64 {
    DEFAULT_RENEW_THRESHOLD_SECS
}

fn default_trace_header() -> String {
    DEFAULT_TRACE_HEADER.to_owned()
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [auth]
        issuer = "https://id.example.com"
        client_id = "meridian-web"
        redirect_uri = "https://app.example.com/callback"
        post_logout_redirect_uri = "https://app.example.com/"

        [api]
        base_url = "https://api.example.com"
    "#;

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();

        assert_eq!(config.auth.scopes, vec!["openid", "profile", "email", "offline_access"]);
        assert_eq!(config.auth.renew_threshold_secs, 60);
        assert_eq!(config.api.trace_header, "x-trace-id");
        assert_eq!(config.api.retry.max_retries, 3);
        assert!((config.api.retry.jitter - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.poller.max_concurrency, 5);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.poller.max_concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.api.base_url = "not a url".into();
        assert!(matches!(config.validate(), Err(MeridianError::Config(_))));
    }

    #[test]
    fn rejects_scopes_without_openid() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.auth.scopes = vec!["profile".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.api.retry.base_delay_ms = 20_000;
        assert!(config.validate().is_err());
    }
}
