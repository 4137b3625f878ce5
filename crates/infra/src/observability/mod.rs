//! Logging setup
//!
//! Installs the global `tracing` subscriber. The filter comes from
//! `RUST_LOG` and defaults to `info`.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Fallback filter when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, for terminals.
    #[default]
    Text,
    /// One JSON object per line, for log shipping.
    Json,
}

impl FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ObservabilityError::UnknownFormat(other.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("unknown log format: {0}")]
    UnknownFormat(String),

    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// # Errors
/// Returns `ObservabilityError::Init` when a global subscriber is already
/// set.
pub fn init_tracing(format: LogFormat) -> Result<(), ObservabilityError> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter()).with_target(true);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    result.map_err(|e| ObservabilityError::Init(e.to_string()))?;
    tracing::debug!(?format, "tracing initialized");
    Ok(())
}
