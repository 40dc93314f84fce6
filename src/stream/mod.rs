//! Notification push stream
//!
//! Keeps one Server-Sent Events connection to the backend alive, turns its
//! events into notification records and hands them to the dispatcher.

mod connector;
mod policy;
pub mod sse;
mod transport;

pub use connector::StreamConnector;
pub use policy::{ConnectionState, ReconnectPolicy, ReconnectTracker, RetryDecision};
pub use transport::{EventStream, HttpSseTransport, PushTransport};

use reqwest::StatusCode;
use thiserror::Error;

/// Reasons a stream connection failed or ended.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to connect: {0}")]
    Connect(#[source] reqwest::Error),

    /// The backend rejected the session (HTTP 401).
    #[error("stream endpoint rejected the session")]
    Unauthorized,

    #[error("stream endpoint returned status {0}")]
    Status(StatusCode),

    #[error("stream read failed: {0}")]
    Read(#[source] reqwest::Error),

    #[error("stream closed by server")]
    Closed,

    /// Nobody is consuming dispatched notifications anymore.
    #[error("dispatch channel closed")]
    DispatchClosed,

    #[error("invalid stream configuration: {0}")]
    Config(String),
}

impl StreamError {
    /// Returns true if reconnecting could help.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StreamError::Unauthorized | StreamError::DispatchClosed | StreamError::Config(_)
        )
    }
}
