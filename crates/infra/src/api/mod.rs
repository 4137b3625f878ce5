//! Meridian API gateway client
//!
//! # Architecture
//!
//! - [`ApiClient`] wraps `reqwest` with per-attempt deadlines, bearer tokens
//!   from a [`SessionHandle`] and retry with exponential backoff from
//!   `meridian_common::resilience`
//! - A 401 ends the session through [`SessionHandle::force_logout`]
//! - Every attempt and outcome goes to a [`DiagnosticSink`]
//! - [`HttpJobApi`] implements the `meridian_core::JobApi` port on top

pub mod auth;
pub mod client;
pub mod diagnostics;
pub mod errors;
pub mod jobs;

pub use auth::{Anonymous, SessionHandle};
pub use client::{ApiClient, ApiClientBuilder, ApiClientConfig, ApiResponse, REQUEST_ID_HEADER};
pub use diagnostics::{ChannelSink, DiagnosticEvent, DiagnosticSink, NoopSink, TracingSink};
pub use errors::{ApiError, RETRYABLE_STATUSES};
pub use jobs::HttpJobApi;
