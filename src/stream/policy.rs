//! Reconnection policy for the notification stream.
//!
//! Fixed delay between attempts and a hard cap on consecutive failures.

use std::time::Duration;

use super::StreamError;
use crate::config::ReconnectSettings;

/// Lifecycle of the stream connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or closed explicitly.
    Idle,
    Connecting,
    Connected,
    /// Dropped; a reconnect is scheduled.
    WaitingToRetry,
    /// Gave up after too many failures. Only an explicit `open()` restarts.
    Exhausted,
}

impl ConnectionState {
    /// Whether a connector task is alive in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::WaitingToRetry
        )
    }
}

/// Retry parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failures after which the connector gives up.
    pub max_attempts: u32,
    /// Wait between a failure and the next attempt.
    pub retry_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(settings: &ReconnectSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }

    /// Whether to reconnect after `error`, given the number of consecutive
    /// failures so far (including this one).
    pub fn should_retry(&self, error: &StreamError, failures: u32) -> bool {
        error.is_retryable() && failures < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// What to do after a failed or dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Consecutive-failure bookkeeping for one connector run.
#[derive(Debug)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    failures: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// A connection was established.
    pub fn on_connected(&mut self) {
        self.failures = 0;
    }

    /// A connection attempt failed or a live connection dropped.
    pub fn on_failure(&mut self, error: &StreamError) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.policy.should_retry(error, self.failures) {
            RetryDecision::RetryAfter(self.policy.retry_delay)
        } else {
            RetryDecision::GiveUp
        }
    }
}
