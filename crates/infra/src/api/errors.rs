//! Gateway error types
//!
//! Every variant that follows a server response carries the trace id the
//! gateway returned, so a failure reported by a user can be matched to the
//! server-side logs.

use std::time::Duration;

use meridian_domain::MeridianError;
use thiserror::Error;

/// Status codes worth another attempt.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

#[derive(Debug, Error)]
pub enum ApiError {
    /// 401. The session has already been torn down when this is returned.
    #[error("request unauthorized, session ended")]
    Unauthorized { trace_id: Option<String> },

    #[error("access forbidden")]
    Forbidden { trace_id: Option<String> },

    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<ApiError> },

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String, trace_id: Option<String> },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode response: {message}")]
    Decode { message: String, trace_id: Option<String> },

    #[error("invalid gateway configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Transient failures: the retryable statuses and timeouts. Connection
    /// errors, auth failures and everything else are final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// HTTP status of the (last) response, if one was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::Status { status, .. } => Some(*status),
            Self::RetryExhausted { last, .. } => last.status(),
            Self::Timeout(_) | Self::Network(_) | Self::Decode { .. } | Self::Config(_) => None,
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::Unauthorized { trace_id }
            | Self::Forbidden { trace_id }
            | Self::Status { trace_id, .. }
            | Self::Decode { trace_id, .. } => trace_id.as_deref(),
            Self::RetryExhausted { last, .. } => last.trace_id(),
            Self::Timeout(_) | Self::Network(_) | Self::Config(_) => None,
        }
    }

    fn with_trace(message: String, trace_id: Option<&str>) -> String {
        match trace_id {
            Some(trace_id) => format!("{message} (trace {trace_id})"),
            None => message,
        }
    }
}

impl From<ApiError> for MeridianError {
    fn from(err: ApiError) -> Self {
        let message = ApiError::with_trace(err.to_string(), err.trace_id());
        match err {
            ApiError::Unauthorized { .. } => Self::Auth(message),
            ApiError::Forbidden { .. } => Self::Forbidden(message),
            ApiError::RetryExhausted { .. } => Self::RetryExhausted(message),
            ApiError::Status { status: 404, .. } => Self::NotFound(message),
            ApiError::Status { status: 400 | 422, .. } => Self::InvalidInput(message),
            ApiError::Status { .. } | ApiError::Timeout(_) | ApiError::Network(_) => {
                Self::Network(message)
            }
            ApiError::Decode { .. } => Self::Decode(message),
            ApiError::Config(_) => Self::Config(message),
        }
    }
}
