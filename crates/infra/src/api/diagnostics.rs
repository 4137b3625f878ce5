//! Request diagnostics
//!
//! The gateway reports every failed attempt and the final outcome of every
//! call to a [`DiagnosticSink`]. `record` is called inline on the request
//! path, so implementations must return immediately.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// One attempt failed. `retry_in` is `None` when no further attempt
    /// follows.
    AttemptFailed {
        request_id: String,
        method: String,
        path: String,
        attempt: u32,
        status: Option<u16>,
        trace_id: Option<String>,
        error: String,
        retry_in: Option<Duration>,
    },
    /// The call finished, successfully or not.
    Completed {
        request_id: String,
        method: String,
        path: String,
        attempts: u32,
        status: Option<u16>,
        trace_id: Option<String>,
        elapsed: Duration,
        success: bool,
    },
}

impl DiagnosticEvent {
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::AttemptFailed { request_id, .. } | Self::Completed { request_id, .. } => request_id,
        }
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: &DiagnosticEvent);
}

/// Writes events as structured `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: &DiagnosticEvent) {
        match event {
            DiagnosticEvent::AttemptFailed {
                request_id,
                method,
                path,
                attempt,
                status,
                trace_id,
                error,
                retry_in,
            } => {
                warn!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    attempt,
                    status = ?status,
                    trace_id = ?trace_id,
                    retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
                    error = %error,
                    "gateway attempt failed"
                );
            }
            DiagnosticEvent::Completed {
                request_id,
                method,
                path,
                attempts,
                status,
                trace_id,
                elapsed,
                success,
            } => {
                if *success {
                    debug!(
                        request_id = %request_id,
                        method = %method,
                        path = %path,
                        attempts,
                        status = ?status,
                        trace_id = ?trace_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "gateway call succeeded"
                    );
                } else {
                    info!(
                        request_id = %request_id,
                        method = %method,
                        path = %path,
                        attempts,
                        status = ?status,
                        trace_id = ?trace_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "gateway call failed"
                    );
                }
            }
        }
    }
}

/// Forwards events to an unbounded channel, for a UI diagnostics panel or
/// for tests.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<DiagnosticEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiagnosticEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DiagnosticSink for ChannelSink {
    fn record(&self, event: &DiagnosticEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(event.clone());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn record(&self, _event: &DiagnosticEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(success: bool) -> DiagnosticEvent {
        DiagnosticEvent::Completed {
            request_id: "req-1".into(),
            method: "GET".into(),
            path: "jobs".into(),
            attempts: 1,
            status: Some(200),
            trace_id: None,
            elapsed: Duration::from_millis(12),
            success,
        }
    }

    #[test]
    fn channel_sink_forwards_in_order() {
        let (sink, mut events) = ChannelSink::new();
        sink.record(&completed(false));
        sink.record(&completed(true));

        assert_eq!(events.try_recv().unwrap(), completed(false));
        assert_eq!(events.try_recv().unwrap(), completed(true));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, events) = ChannelSink::new();
        drop(events);
        sink.record(&completed(true));
    }

    #[test]
    fn tracing_and_noop_sinks_accept_events() {
        TracingSink.record(&completed(false));
        NoopSink.record(&completed(true));
        assert_eq!(completed(true).request_id(), "req-1");
    }
}
