//! Notification center.
//!
//! Owns one session's subsystem: the store, the stream connector and the
//! dispatcher task feeding pushed records into the store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::gateway::{HttpGateway, NotificationGateway};
use crate::notifications::{HydrateOutcome, NotificationRecord, NotificationStore, StoreSnapshot};
use crate::stream::{
    ConnectionState, HttpSseTransport, PushTransport, ReconnectPolicy, StreamConnector,
};

struct RunningDispatcher {
    cancel: CancellationToken,
    /// Hands the inbox back when stopped so the center can be restarted.
    task: JoinHandle<mpsc::Receiver<NotificationRecord>>,
}

#[derive(Default)]
struct DispatchSlot {
    inbox: Option<mpsc::Receiver<NotificationRecord>>,
    running: Option<RunningDispatcher>,
}

pub struct NotificationCenter {
    store: Arc<NotificationStore>,
    connector: StreamConnector,
    dispatch: Mutex<DispatchSlot>,
}

impl NotificationCenter {
    pub fn new(
        gateway: Arc<dyn NotificationGateway>,
        transport: Arc<dyn PushTransport>,
        policy: ReconnectPolicy,
        event_names: Vec<String>,
        channel_capacity: usize,
    ) -> Self {
        let (dispatch_tx, inbox) = mpsc::channel(channel_capacity.max(1));
        Self {
            store: Arc::new(NotificationStore::new(gateway)),
            connector: StreamConnector::new(transport, policy, event_names, dispatch_tx),
            dispatch: Mutex::new(DispatchSlot {
                inbox: Some(inbox),
                running: None,
            }),
        }
    }

    /// Build a center talking HTTP to the configured backend.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let gateway = HttpGateway::new(
            config.api_base_url.clone(),
            config.request_timeout_sec,
            config.session_cookie.as_deref(),
        )
        .context("Failed to create notification gateway")?;

        let transport = HttpSseTransport::new(
            config.stream_url.clone(),
            config.session_cookie.as_deref(),
            Duration::from_secs(config.request_timeout_sec),
        )
        .context("Failed to create notification stream transport")?;

        Ok(Self::new(
            Arc::new(gateway),
            Arc::new(transport),
            ReconnectPolicy::new(&config.reconnect),
            config.stream.event_names.clone(),
            config.dispatch_channel_capacity,
        ))
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    /// Subscribe to store changes.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.store.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connector.state()
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connector.subscribe_state()
    }

    /// Start delivering notifications.
    ///
    /// Opens the stream and loads the current collection. Records pushed
    /// while the load is in flight are kept. A failed load is logged and
    /// does not stop the stream.
    pub async fn start(&self) -> Option<HydrateOutcome> {
        self.start_dispatcher().await;

        if self.connector.open().await {
            info!("Notification stream opened");
        }

        match self.store.hydrate().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Initial notification load failed: {}", e);
                None
            }
        }
    }

    /// Close the stream and stop the dispatcher.
    ///
    /// Records already received are ingested before the dispatcher stops.
    pub async fn shutdown(&self) {
        self.connector.close().await;

        let mut slot = self.dispatch.lock().await;
        if let Some(running) = slot.running.take() {
            running.cancel.cancel();
            match running.task.await {
                Ok(inbox) => slot.inbox = Some(inbox),
                Err(e) => error!("Notification dispatcher task failed: {}", e),
            }
        }
        info!("Notification center stopped");
    }

    async fn start_dispatcher(&self) {
        let mut slot = self.dispatch.lock().await;
        if slot.running.is_some() {
            return;
        }
        let Some(inbox) = slot.inbox.take() else {
            error!("Notification dispatcher inbox lost, pushed notifications will not be delivered");
            return;
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatch_loop(self.store.clone(), inbox, cancel.clone()));
        slot.running = Some(RunningDispatcher { cancel, task });
        debug!("Notification dispatcher started");
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        if let Some(running) = self.dispatch.get_mut().running.take() {
            running.cancel.cancel();
        }
    }
}

/// Single consumer of pushed records; ingests them in arrival order.
async fn dispatch_loop(
    store: Arc<NotificationStore>,
    mut inbox: mpsc::Receiver<NotificationRecord>,
    cancel: CancellationToken,
) -> mpsc::Receiver<NotificationRecord> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = inbox.recv() => match received {
                Some(record) => {
                    let id = record.id.clone();
                    if !store.ingest(record).await {
                        debug!("Ignoring duplicate notification {}", id);
                    }
                }
                None => break,
            }
        }
    }

    while let Ok(record) = inbox.try_recv() {
        store.ingest(record).await;
    }
    inbox
}
