//! Resilient HTTP client for the Meridian API gateway
//!
//! Each call resolves the bearer token per attempt, enforces a per-attempt
//! deadline and retries transient failures with exponential backoff. A 401
//! ends the session immediately and is never retried; a 403 is returned as
//! is and leaves the session alone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use meridian_common::resilience::{policies::PredicateRetry, RetryConfig, RetryError, RetryExecutor};
use meridian_domain::ApiConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::auth::SessionHandle;
use super::diagnostics::{DiagnosticEvent, DiagnosticSink, TracingSink};
use super::errors::ApiError;

/// Sent on every attempt of one logical call.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Error bodies are cut to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 2_048;

/// Gateway client settings
#[derive(Debug, Clone, PartialEq)]
pub struct ApiClientConfig {
    /// Always ends with `/` so relative paths join below it.
    pub base_url: Url,
    pub trace_header: String,
    /// Deadline for one attempt, body included.
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl ApiClientConfig {
    /// Defaults for everything but the base URL.
    ///
    /// # Errors
    /// Returns `ApiError::Config` when `base_url` is not an absolute URL.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::from_config(&ApiConfig {
            base_url: base_url.to_owned(),
            trace_header: meridian_domain::constants::DEFAULT_TRACE_HEADER.to_owned(),
            timeout_ms: meridian_domain::constants::DEFAULT_REQUEST_TIMEOUT_MS,
            retry: meridian_domain::RetrySettings::default(),
        })
    }

    /// # Errors
    /// Returns `ApiError::Config` for an unusable base URL or retry settings.
    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        let retry = RetryConfig::builder()
            .max_retries(config.retry.max_retries)
            .exponential_backoff(
                Duration::from_millis(config.retry.base_delay_ms),
                Duration::from_millis(config.retry.max_delay_ms),
            )
            .proportional_jitter(config.retry.jitter)
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        Ok(Self {
            base_url: normalize_base_url(&config.base_url)?,
            trace_header: config.trace_header.to_ascii_lowercase(),
            timeout: Duration::from_millis(config.timeout_ms),
            retry,
        })
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

fn normalize_base_url(raw: &str) -> Result<Url, ApiError> {
    let mut url =
        Url::parse(raw).map_err(|e| ApiError::Config(format!("invalid base URL {raw:?}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::Config(format!("base URL {raw:?} cannot carry paths")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Successful response together with the gateway trace id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse<T> {
    pub data: T,
    pub trace_id: Option<String>,
}

/// 2xx response before decoding
#[derive(Debug)]
struct RawResponse {
    status: u16,
    trace_id: Option<String>,
    body: String,
}

type GatewayRetry = PredicateRetry<fn(&ApiError) -> bool>;

/// HTTP client for the API gateway
pub struct ApiClient {
    http: Client,
    config: ApiClientConfig,
    session: Arc<dyn SessionHandle>,
    diagnostics: Arc<dyn DiagnosticSink>,
    retry: RetryExecutor<GatewayRetry>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient").field("config", &self.config).finish_non_exhaustive()
    }
}

impl ApiClient {
    /// # Errors
    /// Returns `ApiError::Config` if the HTTP client cannot be built.
    pub fn new(config: ApiClientConfig, session: Arc<dyn SessionHandle>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, config, session))
    }

    pub fn with_http_client(
        http: Client,
        config: ApiClientConfig,
        session: Arc<dyn SessionHandle>,
    ) -> Self {
        let retry = RetryExecutor::new(
            config.retry.clone(),
            PredicateRetry::new(ApiError::is_retryable as fn(&ApiError) -> bool),
        );
        Self { http, config, session, diagnostics: Arc::new(TracingSink), retry }
    }

    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    #[must_use]
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    /// `GET` a JSON resource.
    ///
    /// # Errors
    /// See [`ApiError`]; `Decode` when the body is not a valid `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        let raw = self.execute(Method::GET, path, None).await?;
        decode(raw)
    }

    /// `GET` a text resource such as a CSV export.
    ///
    /// # Errors
    /// See [`ApiError`].
    pub async fn get_text(&self, path: &str) -> Result<ApiResponse<String>, ApiError> {
        let raw = self.execute(Method::GET, path, None).await?;
        Ok(ApiResponse { data: raw.body, trace_id: raw.trace_id })
    }

    /// `POST` a JSON body and decode the JSON response.
    ///
    /// # Errors
    /// See [`ApiError`]; `Config` when the body cannot be serialized.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let body = serde_json::to_vec(body)
            .map_err(|e| ApiError::Config(format!("failed to serialize request body: {e}")))?;
        let raw = self.execute(Method::POST, path, Some(body)).await?;
        decode(raw)
    }

    #[instrument(skip(self, method, body), fields(method = %method))]
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<RawResponse, ApiError> {
        let url = self.url(path)?;
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let outcome = self
            .retry
            .execute_observed(
                || self.attempt(&method, &url, body.as_deref(), &request_id),
                |event| {
                    self.diagnostics.record(&DiagnosticEvent::AttemptFailed {
                        request_id: request_id.clone(),
                        method: method.to_string(),
                        path: path.to_owned(),
                        attempt: event.attempt,
                        status: event.error.status(),
                        trace_id: event.error.trace_id().map(str::to_owned),
                        error: event.error.to_string(),
                        retry_in: event.retry_in,
                    });
                },
            )
            .await;

        let attempts = outcome.attempts;
        let result = match outcome.result {
            Ok(raw) => Ok(raw),
            Err(RetryError::Stopped { error: ApiError::Unauthorized { trace_id }, .. }) => {
                warn!(%request_id, trace_id = ?trace_id, "gateway rejected the session token");
                self.session.force_logout();
                Err(ApiError::Unauthorized { trace_id })
            }
            Err(RetryError::Stopped { error, .. }) => Err(error),
            Err(RetryError::Exhausted { attempts, last }) => {
                Err(ApiError::RetryExhausted { attempts, last: Box::new(last) })
            }
        };

        let (status, trace_id) = match &result {
            Ok(raw) => (Some(raw.status), raw.trace_id.clone()),
            Err(err) => (err.status(), err.trace_id().map(str::to_owned)),
        };
        self.diagnostics.record(&DiagnosticEvent::Completed {
            request_id,
            method: method.to_string(),
            path: path.to_owned(),
            attempts,
            status,
            trace_id,
            elapsed: started.elapsed(),
            success: result.is_ok(),
        });
        result
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&[u8]>,
        request_id: &str,
    ) -> Result<RawResponse, ApiError> {
        let mut request =
            self.http.request(method.clone(), url.clone()).header(REQUEST_ID_HEADER, request_id);
        if let Some(token) = self.session.access_token().await {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body.to_vec());
        }

        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%url, ?timeout, "gateway attempt deadline elapsed");
                Err(ApiError::Timeout(timeout))
            }
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<RawResponse, ApiError> {
        let timeout = self.config.timeout;
        let response = request.send().await.map_err(|e| transport_error(&e, timeout))?;

        let status = response.status().as_u16();
        let trace_id = response
            .headers()
            .get(self.config.trace_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.map_err(|e| transport_error(&e, timeout))?;

        match status {
            200..=299 => Ok(RawResponse { status, trace_id, body }),
            401 => Err(ApiError::Unauthorized { trace_id }),
            403 => Err(ApiError::Forbidden { trace_id }),
            _ => Err(ApiError::Status {
                status,
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                trace_id,
            }),
        }
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.config
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Config(format!("invalid request path {path:?}: {e}")))
    }
}

fn transport_error(err: &reqwest::Error, timeout: Duration) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(timeout)
    } else {
        ApiError::Network(err.to_string())
    }
}

fn decode<T: DeserializeOwned>(raw: RawResponse) -> Result<ApiResponse<T>, ApiError> {
    // 204 and friends decode as JSON null.
    let body = if raw.body.trim().is_empty() { "null" } else { raw.body.as_str() };
    match serde_json::from_str(body) {
        Ok(data) => Ok(ApiResponse { data, trace_id: raw.trace_id }),
        Err(e) => Err(ApiError::Decode { message: e.to_string(), trace_id: raw.trace_id }),
    }
}

/// Builder for [`ApiClient`]
#[derive(Default)]
pub struct ApiClientBuilder {
    config: Option<ApiClientConfig>,
    session: Option<Arc<dyn SessionHandle>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    http: Option<Client>,
}

impl ApiClientBuilder {
    #[must_use]
    pub fn config(mut self, config: ApiClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn session(mut self, session: Arc<dyn SessionHandle>) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    #[must_use]
    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    /// # Errors
    /// Returns `ApiError::Config` when the config or session is missing, or
    /// the HTTP client cannot be built.
    pub fn build(self) -> Result<ApiClient, ApiError> {
        let config = self.config.ok_or_else(|| ApiError::Config("config not set".into()))?;
        let session = self.session.ok_or_else(|| ApiError::Config("session not set".into()))?;
        let client = match self.http {
            Some(http) => ApiClient::with_http_client(http, config, session),
            None => ApiClient::new(config, session)?,
        };
        Ok(match self.diagnostics {
            Some(sink) => client.with_diagnostics(sink),
            None => client,
        })
    }
}
