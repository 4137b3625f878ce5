//! Application constants
//!
//! Centralized defaults shared by the configuration structs and the crates
//! that consume them.

// Identity provider
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access"];
pub const DEFAULT_RENEW_THRESHOLD_SECS: u64 = 60;

// API gateway
pub const DEFAULT_TRACE_HEADER: &str = "x-trace-id";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_RETRY_JITTER: f64 = 0.3;

// Job polling
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_POLL_MAX_CONCURRENCY: usize = 5;
pub const JOB_EVENT_CHANNEL_CAPACITY: usize = 64;
