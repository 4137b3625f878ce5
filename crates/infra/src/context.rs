//! Application wiring
//!
//! Builds the session manager, gateway client and job services from a
//! validated [`Config`] and hands them out as one context.

use std::sync::Arc;

use meridian_common::auth::{
    AuthError, Navigator, OAuthClient, OAuthClientError, OAuthClientTrait, OAuthConfig,
    ProviderMetadata, SessionManager, StateStore,
};
use meridian_core::{JobPoller, JobService, JobTracker};
use meridian_domain::{AuthConfig, Config, EndpointConfig, MeridianError};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::api::{ApiClient, ApiClientConfig, ApiError, DiagnosticSink, HttpJobApi, TracingSink};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] MeridianError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    OAuthClient(#[from] OAuthClientError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Everything a UI shell needs, wired together
pub struct AppContext {
    config: Config,
    session: SessionManager,
    api: Arc<ApiClient>,
    jobs: JobService,
    poller: JobPoller,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("session", &self.session)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Wire the context, discovering the provider endpoints unless they are
    /// configured, and restore a persisted session.
    ///
    /// # Errors
    /// Returns `ContextError` for invalid configuration, failed discovery or
    /// an unreadable session store.
    pub async fn bootstrap(
        config: Config,
        store: Arc<dyn StateStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ContextError> {
        config.validate()?;
        let oauth = oauth_config(&config.auth)?;
        let client = match &config.auth.endpoints {
            Some(endpoints) => OAuthClient::new(oauth, provider_metadata(endpoints)?)?,
            None => OAuthClient::discover(oauth).await?,
        };
        Self::assemble(config, Arc::new(client), store, navigator, Arc::new(TracingSink))
    }

    /// Wire the context around an existing identity provider client. Must
    /// run inside a tokio runtime, the job poller starts immediately.
    ///
    /// # Errors
    /// Returns `ContextError` for invalid configuration or an unreadable
    /// session store.
    pub fn assemble(
        config: Config,
        client: Arc<dyn OAuthClientTrait>,
        store: Arc<dyn StateStore>,
        navigator: Arc<dyn Navigator>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, ContextError> {
        config.validate()?;
        let session = SessionManager::new(oauth_config(&config.auth)?, client, store, navigator);
        let restored = session.initialize()?;

        let api = Arc::new(
            ApiClient::new(ApiClientConfig::from_config(&config.api)?, Arc::new(session.clone()))?
                .with_diagnostics(diagnostics),
        );
        let job_api = Arc::new(HttpJobApi::new(Arc::clone(&api)));
        let tracker = Arc::new(JobTracker::new());
        let jobs = JobService::new(job_api.clone(), Arc::clone(&tracker));
        let poller = JobPoller::spawn(job_api, tracker, &config.poller);

        info!(restored, api = %config.api.base_url, "application context ready");
        Ok(Self { config, session, api, jobs, poller })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn session(&self) -> &SessionManager {
        &self.session
    }

    #[must_use]
    pub const fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    #[must_use]
    pub const fn jobs(&self) -> &JobService {
        &self.jobs
    }

    #[must_use]
    pub const fn tracker(&self) -> &Arc<JobTracker> {
        self.jobs.tracker()
    }

    #[must_use]
    pub const fn poller(&self) -> &JobPoller {
        &self.poller
    }

    /// Stop the job poller and wait for it to exit.
    pub async fn shutdown(&self) {
        self.poller.shutdown().await;
    }
}

/// Session settings from the `auth` config section.
///
/// # Errors
/// Returns `MeridianError::Config` when a URL does not parse.
pub fn oauth_config(auth: &AuthConfig) -> Result<OAuthConfig, MeridianError> {
    Ok(OAuthConfig::new(
        parse_url("auth.issuer", &auth.issuer)?,
        auth.client_id.clone(),
        parse_url("auth.redirect_uri", &auth.redirect_uri)?,
        parse_url("auth.post_logout_redirect_uri", &auth.post_logout_redirect_uri)?,
    )
    .with_scopes(auth.scopes.clone())
    .with_renew_threshold(std::time::Duration::from_secs(auth.renew_threshold_secs)))
}

fn provider_metadata(endpoints: &EndpointConfig) -> Result<ProviderMetadata, MeridianError> {
    Ok(ProviderMetadata {
        authorization_endpoint: parse_url(
            "auth.endpoints.authorization_endpoint",
            &endpoints.authorization_endpoint,
        )?,
        token_endpoint: parse_url("auth.endpoints.token_endpoint", &endpoints.token_endpoint)?,
        userinfo_endpoint: endpoints
            .userinfo_endpoint
            .as_deref()
            .map(|url| parse_url("auth.endpoints.userinfo_endpoint", url))
            .transpose()?,
        end_session_endpoint: endpoints
            .end_session_endpoint
            .as_deref()
            .map(|url| parse_url("auth.endpoints.end_session_endpoint", url))
            .transpose()?,
    })
}

fn parse_url(field: &str, value: &str) -> Result<Url, MeridianError> {
    Url::parse(value).map_err(|e| MeridianError::Config(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use meridian_common::testing::{MemoryStateStore, MockOAuthClient, RecordingNavigator};
    use meridian_domain::{ApiConfig, PollerConfig, RetrySettings};

    use super::*;
    use crate::api::NoopSink;

    fn config() -> Config {
        Config {
            auth: AuthConfig {
                issuer: "https://id.example.com/realms/meridian".into(),
                client_id: "meridian-web".into(),
                redirect_uri: "https://app.example.com/callback".into(),
                post_logout_redirect_uri: "https://app.example.com/".into(),
                scopes: vec!["openid".into(), "offline_access".into()],
                renew_threshold_secs: 30,
                endpoints: None,
            },
            api: ApiConfig {
                base_url: "http://127.0.0.1:9".into(),
                trace_header: "X-Trace-Id".into(),
                timeout_ms: 1_000,
                retry: RetrySettings::default(),
            },
            poller: PollerConfig::default(),
        }
    }

    #[test]
    fn oauth_config_carries_scopes_and_threshold() {
        let oauth = oauth_config(&config().auth).unwrap();
        assert_eq!(oauth.scope_string(), "openid offline_access");
        assert_eq!(oauth.renew_threshold, std::time::Duration::from_secs(30));
    }

    #[test]
    fn static_endpoints_are_parsed() {
        let endpoints = EndpointConfig {
            authorization_endpoint: "https://id.example.com/authorize".into(),
            token_endpoint: "https://id.example.com/token".into(),
            userinfo_endpoint: None,
            end_session_endpoint: Some("https://id.example.com/logout".into()),
        };
        let metadata = provider_metadata(&endpoints).unwrap();
        assert_eq!(metadata.token_endpoint.path(), "/token");
        assert!(metadata.userinfo_endpoint.is_none());
        assert_eq!(metadata.end_session_endpoint.unwrap().path(), "/logout");
    }

    #[tokio::test]
    async fn assembles_anonymous_context_and_shuts_down() {
        let context = AppContext::assemble(
            config(),
            Arc::new(MockOAuthClient::new()),
            Arc::new(MemoryStateStore::new()),
            Arc::new(RecordingNavigator::new()),
            Arc::new(NoopSink),
        )
        .unwrap();

        assert!(!context.session().is_authenticated());
        assert_eq!(context.api().config().trace_header, "x-trace-id");
        assert!(context.tracker().is_empty());
        assert!(context.poller().is_running());

        context.shutdown().await;
        assert!(!context.poller().is_running());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_wiring() {
        let mut bad = config();
        bad.poller.max_concurrency = 0;
        let result = AppContext::assemble(
            bad,
            Arc::new(MockOAuthClient::new()),
            Arc::new(MemoryStateStore::new()),
            Arc::new(RecordingNavigator::new()),
            Arc::new(NoopSink),
        );
        assert!(matches!(result, Err(ContextError::Config(MeridianError::Config(_)))));
    }
}
