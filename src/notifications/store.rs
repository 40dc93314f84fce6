//! In-memory notification store.
//!
//! Single source of truth for the notifications visible to the client and
//! their unread counter. Pushed records are ingested here, user actions are
//! applied optimistically and persisted through the [`NotificationGateway`].

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::optimistic::{PendingMutation, Snapshot};
use super::NotificationRecord;
use crate::gateway::{GatewayError, NotificationGateway};

/// Hydrations tried to undo a refused mark-all-read before giving up.
const MARK_ALL_READ_RESYNC_ATTEMPTS: u32 = 2;

/// Point-in-time view of the store, published to observers after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Newest first.
    pub notifications: Vec<NotificationRecord>,
    pub unread_count: usize,
}

/// Result of a [`NotificationStore::hydrate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrateOutcome {
    /// The fetched collection replaced the local one.
    Applied { count: usize },
    /// The response was stale (a newer hydration was issued, or a local
    /// mutation happened while it was in flight) and was dropped.
    Discarded,
}

/// Mutable state behind the store lock.
///
/// `unread` is kept in lockstep with the read flags of `notifications`.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    notifications: Vec<NotificationRecord>,
    unread: usize,
    /// Id of the most recently issued hydration.
    hydrate_seq: u64,
    /// Bumped by every local mutation other than ingestion.
    mutation_epoch: u64,
    hydrations_in_flight: usize,
    /// Records pushed while a hydration was in flight, so a fetch that was
    /// generated before they arrived does not wipe them out.
    ingested_during_hydration: Vec<NotificationRecord>,
}

impl StoreState {
    fn position(&self, id: &str) -> Option<usize> {
        self.notifications.iter().position(|n| n.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub(crate) fn records(&self) -> &[NotificationRecord] {
        &self.notifications
    }

    pub(crate) fn unread(&self) -> usize {
        self.unread
    }

    /// Prepend a pushed record. Returns false if the id is already known.
    pub(crate) fn ingest(&mut self, record: NotificationRecord) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        if !record.is_read {
            self.unread += 1;
        }
        if self.hydrations_in_flight > 0 {
            self.ingested_during_hydration.push(record.clone());
        }
        self.notifications.insert(0, record);
        true
    }

    /// Replace the collection with a server-provided list, keeping its order.
    fn replace_all(&mut self, mut records: Vec<NotificationRecord>) {
        let mut seen = HashSet::new();
        records.retain(|r| seen.insert(r.id.clone()));
        self.notifications = records;

        // Oldest first, so the most recent push ends up on top.
        for record in std::mem::take(&mut self.ingested_during_hydration) {
            if !self.contains(&record.id) {
                self.notifications.insert(0, record);
            }
        }

        self.unread = self.notifications.iter().filter(|n| !n.is_read).count();
    }

    fn begin_hydration(&mut self) -> (u64, u64) {
        self.hydrate_seq += 1;
        self.hydrations_in_flight += 1;
        (self.hydrate_seq, self.mutation_epoch)
    }

    fn end_hydration(&mut self) {
        self.hydrations_in_flight = self.hydrations_in_flight.saturating_sub(1);
        if self.hydrations_in_flight == 0 {
            self.ingested_during_hydration.clear();
        }
    }

    fn is_current_hydration(&self, token: u64, epoch: u64) -> bool {
        self.hydrate_seq == token && self.mutation_epoch == epoch
    }

    /// Tentatively mark one record read. `None` if there is nothing to change.
    pub(crate) fn begin_mark_read(&mut self, id: &str) -> Option<PendingMutation> {
        let record = self.notifications.iter_mut().find(|n| n.id == id)?;
        if record.is_read {
            return None;
        }
        record.is_read = true;
        self.unread = self.unread.saturating_sub(1);
        self.mutation_epoch += 1;
        Some(PendingMutation::new(Snapshot::ReadFlag { id: id.to_string() }))
    }

    /// Flip a record back to unread, if it is still present and read.
    pub(crate) fn set_unread(&mut self, id: &str) {
        if let Some(record) = self.notifications.iter_mut().find(|n| n.id == id) {
            if record.is_read {
                record.is_read = false;
                self.unread += 1;
            }
        }
    }

    /// Mark everything read. Returns how many records changed.
    fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for record in self.notifications.iter_mut().filter(|n| !n.is_read) {
            record.is_read = true;
            changed += 1;
        }
        self.unread = 0;
        self.mutation_epoch += 1;
        changed
    }

    /// Tentatively remove a record. `None` if the id is unknown.
    pub(crate) fn begin_delete(&mut self, id: &str) -> Option<PendingMutation> {
        let index = self.position(id)?;
        let record = self.notifications.remove(index);
        if !record.is_read {
            self.unread = self.unread.saturating_sub(1);
        }
        self.mutation_epoch += 1;
        Some(PendingMutation::new(Snapshot::Removed { index, record }))
    }

    /// Put a record back at `index` (clamped), unless its id reappeared.
    pub(crate) fn insert_at(&mut self, index: usize, record: NotificationRecord) {
        if self.contains(&record.id) {
            return;
        }
        if !record.is_read {
            self.unread += 1;
        }
        let index = index.min(self.notifications.len());
        self.notifications.insert(index, record);
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            notifications: self.notifications.clone(),
            unread_count: self.unread,
        }
    }
}

/// Owned notification state for one client session.
///
/// All mutations go through the methods below; the lock is never held across
/// a gateway call.
pub struct NotificationStore {
    gateway: Arc<dyn NotificationGateway>,
    state: Mutex<StoreState>,
    changes: watch::Sender<StoreSnapshot>,
}

impl NotificationStore {
    pub fn new(gateway: Arc<dyn NotificationGateway>) -> Self {
        let (changes, _) = watch::channel(StoreSnapshot::default());
        Self {
            gateway,
            state: Mutex::new(StoreState::default()),
            changes,
        }
    }

    fn publish(&self, state: &StoreState) {
        self.changes.send_replace(state.snapshot());
    }

    /// Subscribe to store changes.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.changes.subscribe()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.changes.borrow().clone()
    }

    /// Current notifications, newest first.
    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.changes.borrow().notifications.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.changes.borrow().unread_count
    }

    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        self.changes
            .borrow()
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.changes.borrow().notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the full collection from the backend, replacing the local one.
    ///
    /// On failure the current state is left untouched. A response is only
    /// applied if it belongs to the latest hydration and no local mutation
    /// started after it was issued.
    pub async fn hydrate(&self) -> Result<HydrateOutcome, GatewayError> {
        let (token, epoch) = self.state.lock().await.begin_hydration();

        let result = self.gateway.fetch_all().await;

        let mut state = self.state.lock().await;
        let outcome = match result {
            Ok(records) if state.is_current_hydration(token, epoch) => {
                state.replace_all(records);
                self.publish(&state);
                let count = state.records().len();
                info!(
                    "Hydrated {} notifications ({} unread)",
                    count,
                    state.unread()
                );
                Ok(HydrateOutcome::Applied { count })
            }
            Ok(_) => {
                debug!("Discarding stale notification hydration #{}", token);
                Ok(HydrateOutcome::Discarded)
            }
            Err(e) => {
                warn!("Failed to hydrate notifications, keeping current state: {}", e);
                Err(e)
            }
        };
        state.end_hydration();
        outcome
    }

    /// Add a pushed record. Duplicate ids are ignored.
    ///
    /// Returns true if the record was inserted.
    pub async fn ingest(&self, record: NotificationRecord) -> bool {
        let mut state = self.state.lock().await;
        let inserted = state.ingest(record);
        if inserted {
            self.publish(&state);
        }
        inserted
    }

    /// Mark one notification as read, rolling back if the backend refuses.
    pub async fn mark_read(&self, id: &str) -> Result<(), GatewayError> {
        let pending = {
            let mut state = self.state.lock().await;
            let pending = state.begin_mark_read(id);
            if pending.is_some() {
                self.publish(&state);
            }
            pending
        };

        match self.gateway.mark_read(id).await {
            Ok(()) => {
                if let Some(pending) = pending {
                    pending.commit();
                }
                Ok(())
            }
            Err(e) => {
                warn!("Failed to mark notification {} as read, rolling back: {}", id, e);
                if let Some(pending) = pending {
                    let mut state = self.state.lock().await;
                    pending.restore(&mut state);
                    self.publish(&state);
                }
                Err(e)
            }
        }
    }

    /// Mark every notification as read.
    ///
    /// There is no per-record rollback: if the backend refuses, the store is
    /// resynchronized with a fresh hydration.
    pub async fn mark_all_read(&self) -> Result<(), GatewayError> {
        {
            let mut state = self.state.lock().await;
            let changed = state.mark_all_read();
            debug!("Optimistically marked {} notifications as read", changed);
            self.publish(&state);
        }

        if let Err(e) = self.gateway.mark_all_read().await {
            warn!("Failed to mark all notifications as read, resynchronizing: {}", e);
            self.resync_after_refused_mark_all_read().await;
            return Err(e);
        }
        Ok(())
    }

    /// A resync is discarded when another mutation starts while it is in
    /// flight, leaving the refused all-read flags in place. Try again once
    /// before accepting the divergence.
    async fn resync_after_refused_mark_all_read(&self) {
        for attempt in 1..=MARK_ALL_READ_RESYNC_ATTEMPTS {
            match self.hydrate().await {
                Ok(HydrateOutcome::Applied { .. }) => return,
                Ok(HydrateOutcome::Discarded) => {
                    warn!(
                        "Resynchronization after failed mark-all-read was discarded by a concurrent change (attempt {}/{})",
                        attempt, MARK_ALL_READ_RESYNC_ATTEMPTS
                    );
                }
                Err(e) => {
                    error!("Resynchronization after failed mark-all-read failed: {}", e);
                    return;
                }
            }
        }
        warn!("Giving up resynchronization after failed mark-all-read, read flags may differ from the backend");
    }

    /// Delete one notification, restoring it if the backend refuses.
    ///
    /// A 404 from the backend means the record is already gone there and
    /// counts as success.
    pub async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        let pending = {
            let mut state = self.state.lock().await;
            let pending = state.begin_delete(id);
            if pending.is_some() {
                self.publish(&state);
            }
            pending
        };

        match self.gateway.delete(id).await {
            Ok(()) | Err(GatewayError::NotFound(_)) => {
                if let Some(pending) = pending {
                    pending.commit();
                }
                Ok(())
            }
            Err(e) => {
                warn!("Failed to delete notification {}, restoring it: {}", id, e);
                if let Some(pending) = pending {
                    let mut state = self.state.lock().await;
                    pending.restore(&mut state);
                    self.publish(&state);
                }
                Err(e)
            }
        }
    }

    /// Ask the backend for its unread counter.
    ///
    /// The local counter is never overwritten with it; a mismatch only means
    /// the local view is behind and a hydration is due.
    pub async fn server_unread_count(&self) -> Result<u64, GatewayError> {
        let remote = self.gateway.fetch_unread_count().await?;
        let local = self.unread_count() as u64;
        if remote != local {
            debug!(
                "Unread count differs from backend (local={}, remote={})",
                local, remote
            );
        }
        Ok(remote)
    }
}
