//! Stream connector.
//!
//! Owns the push connection and its reconnect loop. Parsed records are
//! published on an mpsc channel drained by the dispatcher.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::policy::{ConnectionState, ReconnectPolicy, ReconnectTracker, RetryDecision};
use super::sse::{SseEvent, DEFAULT_EVENT};
use super::transport::PushTransport;
use super::StreamError;
use crate::notifications::NotificationRecord;

/// The running reconnect loop, if any.
struct ConnectorRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Everything the reconnect loop needs, cloned into its task.
#[derive(Clone)]
struct Worker {
    transport: Arc<dyn PushTransport>,
    policy: ReconnectPolicy,
    /// Custom event names carrying notifications, besides `message`.
    event_names: Arc<[String]>,
    dispatch: mpsc::Sender<NotificationRecord>,
    state: Arc<watch::Sender<ConnectionState>>,
    failures: Arc<AtomicU32>,
}

/// Maintains one live push connection and reconnects it per the policy.
pub struct StreamConnector {
    worker: Worker,
    run: Mutex<Option<ConnectorRun>>,
}

impl StreamConnector {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        policy: ReconnectPolicy,
        event_names: Vec<String>,
        dispatch: mpsc::Sender<NotificationRecord>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            worker: Worker {
                transport,
                policy,
                event_names: event_names.into(),
                dispatch,
                state: Arc::new(state),
                failures: Arc::new(AtomicU32::new(0)),
            },
            run: Mutex::new(None),
        }
    }

    /// Open the stream.
    ///
    /// No-op while a connection is open, being opened, or waiting to be
    /// retried. Returns true if a new connection loop was started.
    pub async fn open(&self) -> bool {
        let mut run = self.run.lock().await;
        if self.state().is_active() {
            debug!("Notification stream already open");
            return false;
        }

        let cancel = CancellationToken::new();
        self.worker.failures.store(0, Ordering::SeqCst);
        self.worker.set_state(ConnectionState::Connecting);

        let task = tokio::spawn(self.worker.clone().run(cancel.clone()));
        *run = Some(ConnectorRun { cancel, task });
        true
    }

    /// Close the stream and cancel any pending reconnect.
    pub async fn close(&self) {
        let mut run = self.run.lock().await;
        if let Some(current) = run.take() {
            current.cancel.cancel();
            if let Err(e) = current.task.await {
                if e.is_panic() {
                    error!("Notification stream task panicked: {}", e);
                }
            }
            info!("Notification stream closed");
        }
        self.worker.set_state(ConnectionState::Idle);
    }

    pub fn state(&self) -> ConnectionState {
        *self.worker.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.worker.state.subscribe()
    }

    /// Consecutive failures since the last successful connect.
    pub fn failures(&self) -> u32 {
        self.worker.failures.load(Ordering::SeqCst)
    }
}

impl Drop for StreamConnector {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.cancel.cancel();
        }
    }
}

impl Worker {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Reconnect loop. Runs until cancelled or the policy gives up.
    async fn run(self, cancel: CancellationToken) {
        let mut tracker = ReconnectTracker::new(self.policy.clone());

        loop {
            self.set_state(ConnectionState::Connecting);

            let error = tokio::select! {
                error = self.connect_and_pump(&mut tracker) => error,
                _ = cancel.cancelled() => {
                    debug!("Notification stream cancelled");
                    return;
                }
            };

            let decision = tracker.on_failure(&error);
            self.failures.store(tracker.failures(), Ordering::SeqCst);

            match decision {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        "Notification stream disconnected: {}, reconnecting in {}ms (failure {}/{})",
                        error,
                        delay.as_millis(),
                        tracker.failures(),
                        self.policy.max_attempts
                    );
                    self.set_state(ConnectionState::WaitingToRetry);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            debug!("Notification stream cancelled during reconnect wait");
                            return;
                        }
                    }
                }
                RetryDecision::GiveUp => {
                    error!(
                        "Notification stream giving up after {} consecutive failures: {}",
                        tracker.failures(),
                        error
                    );
                    self.set_state(ConnectionState::Exhausted);
                    return;
                }
            }
        }
    }

    /// Connect once and forward events until the connection ends.
    ///
    /// Returns why the connection ended.
    async fn connect_and_pump(&self, tracker: &mut ReconnectTracker) -> StreamError {
        let mut events = match self.transport.connect().await {
            Ok(events) => events,
            Err(e) => return e,
        };

        tracker.on_connected();
        self.failures.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        info!("Notification stream connected");

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if let Err(e) = self.forward(event).await {
                        return e;
                    }
                }
                Err(e) => return e,
            }
        }

        StreamError::Closed
    }

    fn accepts(&self, name: &str) -> bool {
        name == DEFAULT_EVENT || self.event_names.iter().any(|n| n == name)
    }

    /// Parse one event and hand it to the dispatcher.
    ///
    /// Malformed payloads are dropped; only a closed dispatch channel is an error.
    async fn forward(&self, event: SseEvent) -> Result<(), StreamError> {
        if !self.accepts(event.name()) {
            trace!("Ignoring '{}' stream event", event.name());
            return Ok(());
        }

        let record = match serde_json::from_str::<NotificationRecord>(&event.data) {
            Ok(record) => record,
            Err(e) => {
                warn!("Discarding malformed notification event: {} - {}", e, event.data);
                return Ok(());
            }
        };

        debug!(
            "Received notification {} ({})",
            record.id, record.notification_type
        );
        self.dispatch
            .send(record)
            .await
            .map_err(|_| StreamError::DispatchClosed)
    }
}
