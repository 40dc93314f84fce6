//! Notification REST gateway
//!
//! Stateless request/response access to the backend's notification API.
//! Every call is a single round trip; failures are handed back to the caller
//! untouched, nothing is retried here.

mod client;

pub use client::HttpGateway;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::notifications::NotificationRecord;

/// Errors returned by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The backend rejected the session (HTTP 401).
    #[error("session is not authorized")]
    Unauthorized,

    #[error("notification not found: {0}")]
    NotFound(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

/// Remote operations backing the notification store.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Fetch the full notification collection, newest first.
    async fn fetch_all(&self) -> Result<Vec<NotificationRecord>, GatewayError>;

    /// Fetch the server-side unread counter.
    async fn fetch_unread_count(&self) -> Result<u64, GatewayError>;

    async fn mark_read(&self, id: &str) -> Result<(), GatewayError>;

    async fn mark_all_read(&self) -> Result<(), GatewayError>;

    async fn delete(&self, id: &str) -> Result<(), GatewayError>;
}
