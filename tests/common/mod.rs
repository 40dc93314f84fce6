//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, SEEDED_COUNT};
//!
//! #[tokio::test]
//! async fn test_hydrate() {
//!     let server = TestServer::spawn().await;
//!     let center = server.center(3);
//!
//!     center.store().hydrate().await.unwrap();
//!     assert_eq!(center.store().len(), SEEDED_COUNT);
//! }
//! ```

// Each test binary uses a different subset of the harness.
#![allow(dead_code)]

mod server;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{make_record, seeded_notifications, snapshot_ids, write_config_file};
#[allow(unused_imports)]
pub use server::{ListFormat, MockBackend, TestServer};

use std::future::Future;
use std::time::Duration;

/// Waits until `condition` holds, panicking after `WAIT_TIMEOUT_MS`.
pub async fn wait_until<F>(description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let result = tokio::time::timeout(Duration::from_millis(WAIT_TIMEOUT_MS), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if result.is_err() {
        panic!("Timed out waiting for {}", description);
    }
}

/// Awaits `future`, panicking after `WAIT_TIMEOUT_MS`.
pub async fn within<T>(description: &str, future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(Duration::from_millis(WAIT_TIMEOUT_MS), future).await {
        Ok(value) => value,
        Err(_) => panic!("Timed out waiting for {}", description),
    }
}
