//! Subscriber side of the capacity channel.

use std::sync::{Arc, Mutex, PoisonError};

use selfreg_types::{CapacityUpdate, EventId};
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Why the hub stopped delivering to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The subscriber's queue filled up.
    Lagged,
}

/// Keeps the highest-sequence update seen for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    latest: Option<CapacityUpdate>,
}

impl SequenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `update` if it is newer than anything seen. Returns whether it
    /// was accepted; stale and duplicate deliveries return `false`.
    pub fn observe(&mut self, update: CapacityUpdate) -> bool {
        if update.supersedes(self.latest.as_ref()) {
            self.latest = Some(update);
            true
        } else {
            false
        }
    }

    /// Highest-sequence update accepted so far.
    #[must_use]
    pub fn latest(&self) -> Option<CapacityUpdate> {
        self.latest
    }
}

/// A live subscription to one event's remaining capacity.
///
/// The first item is always the snapshot taken at subscription time.
#[derive(Debug)]
pub struct CapacitySubscription {
    event_id: EventId,
    receiver: mpsc::Receiver<CapacityUpdate>,
    tracker: SequenceTracker,
    drop_reason: Arc<Mutex<Option<DropReason>>>,
}

impl CapacitySubscription {
    pub(crate) fn new(
        event_id: EventId,
        receiver: mpsc::Receiver<CapacityUpdate>,
        drop_reason: Arc<Mutex<Option<DropReason>>>,
    ) -> Self {
        Self {
            event_id,
            receiver,
            tracker: SequenceTracker::new(),
            drop_reason,
        }
    }

    #[must_use]
    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Next update newer than everything already yielded.
    ///
    /// Returns `None` once the hub has dropped this subscriber and the queue
    /// is drained.
    pub async fn recv(&mut self) -> Option<CapacityUpdate> {
        loop {
            let update = self.receiver.recv().await?;
            if self.tracker.observe(update) {
                return Some(update);
            }
        }
    }

    /// Non-blocking [`CapacitySubscription::recv`]. `None` means nothing new
    /// is queued right now, or the subscription has ended.
    pub fn try_recv(&mut self) -> Option<CapacityUpdate> {
        loop {
            match self.receiver.try_recv() {
                Ok(update) => {
                    if self.tracker.observe(update) {
                        return Some(update);
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Highest-sequence update yielded so far.
    #[must_use]
    pub fn latest(&self) -> Option<CapacityUpdate> {
        self.tracker.latest()
    }

    /// Set if the hub dropped this subscriber.
    #[must_use]
    pub fn drop_reason(&self) -> Option<DropReason> {
        *self
            .drop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
