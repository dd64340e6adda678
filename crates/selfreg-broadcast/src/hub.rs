//! Capacity Broadcast Hub.
//!
//! Holds one topic per event: the highest-sequence snapshot seen and the
//! live subscribers. The hub is told about changes through
//! [`CapacityObserver::on_commit`], which the transaction runner calls after
//! every commit that touched a counter.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use selfreg_types::{BroadcastConfig, CapacityObserver, CapacityUpdate, EventId, Result, SelfRegError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::subscription::{CapacitySubscription, DropReason};

struct Subscriber {
    sender: mpsc::Sender<CapacityUpdate>,
    drop_reason: Arc<Mutex<Option<DropReason>>>,
}

impl Subscriber {
    fn mark_dropped(&self, reason: DropReason) {
        *self
            .drop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }
}

#[derive(Default)]
struct Topic {
    snapshot: Option<CapacityUpdate>,
    subscribers: BTreeMap<u64, Subscriber>,
}

impl Topic {
    fn absorb(&mut self, update: CapacityUpdate) {
        if update.supersedes(self.snapshot.as_ref()) {
            self.snapshot = Some(update);
        }
    }
}

#[derive(Default)]
struct HubState {
    next_subscriber_id: u64,
    topics: HashMap<EventId, Topic>,
}

/// Fan-out of committed capacity changes to display subscribers.
#[derive(Clone)]
pub struct CapacityHub {
    inner: Arc<Mutex<HubState>>,
    config: BroadcastConfig,
}

impl CapacityHub {
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubState::default())),
            config,
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, HubState>> {
        self.inner
            .lock()
            .map_err(|_| SelfRegError::Internal("broadcast hub lock poisoned".to_string()))
    }

    /// Subscribe to `snapshot.event_id`.
    ///
    /// `snapshot` is the caller's read of the committed counter. The hub
    /// sends whichever of it and its own snapshot is newer before anything
    /// else.
    ///
    /// # Errors
    /// `SubscriberLimitReached` when the event is at its subscriber cap.
    pub fn subscribe(&self, snapshot: CapacityUpdate) -> Result<CapacitySubscription> {
        let event_id = snapshot.event_id;
        let mut state = self.lock_state()?;
        let id = state.next_subscriber_id;
        state.next_subscriber_id = state.next_subscriber_id.saturating_add(1);

        let topic = state.topics.entry(event_id).or_default();
        if topic.subscribers.len() >= self.config.max_subscribers_per_event {
            return Err(SelfRegError::SubscriberLimitReached {
                event_id,
                max: self.config.max_subscribers_per_event,
            });
        }
        topic.absorb(snapshot);

        let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer.max(1));
        if let Some(current) = topic.snapshot {
            // Fresh channel with capacity >= 1: cannot be full.
            let _ = sender.try_send(current);
        }
        let drop_reason = Arc::new(Mutex::new(None));
        topic.subscribers.insert(
            id,
            Subscriber {
                sender,
                drop_reason: Arc::clone(&drop_reason),
            },
        );
        debug!(event = %event_id, subscriber = id, "display subscribed");
        Ok(CapacitySubscription::new(event_id, receiver, drop_reason))
    }

    /// Forward committed updates to every subscriber of their events.
    ///
    /// Updates are forwarded even when older than the topic snapshot; the
    /// subscriber side discards them.
    pub fn publish(&self, updates: &[CapacityUpdate]) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for update in updates {
            let topic = state.topics.entry(update.event_id).or_default();
            topic.absorb(*update);

            let mut dropped = Vec::new();
            for (id, subscriber) in &topic.subscribers {
                match subscriber.sender.try_send(*update) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        subscriber.mark_dropped(DropReason::Lagged);
                        warn!(event = %update.event_id, subscriber = id, "dropping lagging display subscriber");
                        dropped.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(event = %update.event_id, subscriber = id, "display subscriber closed");
                        dropped.push(*id);
                    }
                }
            }
            for id in dropped {
                topic.subscribers.remove(&id);
            }
        }
    }

    /// Highest-sequence update the hub has seen for `event_id`.
    #[must_use]
    pub fn snapshot(&self, event_id: EventId) -> Option<CapacityUpdate> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.topics.get(&event_id).and_then(|t| t.snapshot)
    }

    /// Live subscribers for `event_id`.
    #[must_use]
    pub fn subscriber_count(&self, event_id: EventId) -> usize {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .topics
            .get(&event_id)
            .map_or(0, |t| t.subscribers.len())
    }
}

impl CapacityObserver for CapacityHub {
    fn on_commit(&self, updates: &[CapacityUpdate]) {
        self.publish(updates);
    }
}
