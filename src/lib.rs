//! Collab Notifications Client Library
//!
//! Real-time notification delivery for the collaboration platform: a
//! server-push stream with bounded reconnection, a local notification store
//! with optimistic updates, and the REST gateway behind it.

pub mod center;
pub mod config;
pub mod gateway;
pub mod notifications;
pub mod stream;

// Re-export commonly used types for convenience
pub use center::NotificationCenter;
pub use gateway::{GatewayError, HttpGateway, NotificationGateway};
pub use notifications::{NotificationRecord, NotificationStore, StoreSnapshot};
pub use stream::{ConnectionState, ReconnectPolicy, StreamConnector, StreamError};
