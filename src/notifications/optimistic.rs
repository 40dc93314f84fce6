//! Optimistic mutations with rollback.
//!
//! A mutation runs in three steps: capture a [`Snapshot`] of what it is about
//! to change, apply the tentative change, then either [`PendingMutation::commit`]
//! once the backend confirms or [`PendingMutation::restore`] when it does not.

use super::store::StoreState;
use super::NotificationRecord;

/// Prior state captured before a tentative change.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Snapshot {
    /// A record whose read flag was flipped to read.
    ReadFlag { id: String },
    /// A record that was removed, with the position it held.
    Removed {
        index: usize,
        record: NotificationRecord,
    },
}

/// A tentative change awaiting backend confirmation.
#[derive(Debug)]
#[must_use = "a pending mutation must be committed or restored"]
pub(crate) struct PendingMutation {
    snapshot: Snapshot,
}

impl PendingMutation {
    pub(crate) fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    /// Backend confirmed: the tentative state becomes the real one.
    pub(crate) fn commit(self) {}

    /// Backend refused: put the captured state back.
    ///
    /// Restoring is tolerant of changes that happened in between. A record
    /// that disappeared is not resurrected by a read-flag rollback, and a
    /// removed record that came back through another path is not duplicated.
    pub(crate) fn restore(self, state: &mut StoreState) {
        match self.snapshot {
            Snapshot::ReadFlag { id } => {
                state.set_unread(&id);
            }
            Snapshot::Removed { index, record } => {
                state.insert_at(index, record);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}
