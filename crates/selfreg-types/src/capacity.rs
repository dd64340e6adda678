//! Per-event capacity accounting.
//!
//! The counter is the single source of truth for "how many slots remain":
//! ```text
//! remaining = capacity - held        held = #reservations with holds_slot()
//! ```
//! `remaining >= 0` at all times. Any mutation that would break this is
//! rejected without changing the counter.

use serde::{Deserialize, Serialize};

use crate::{EventId, Result, SelfRegError};

/// Durable per-event counter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityCounter {
    pub event_id: EventId,
    /// Total slots. Only ever increased.
    pub capacity: u32,
    /// Slots held by PENDING, CONFIRMED and REDEEMED reservations.
    pub held: u32,
    /// Bumped on every committed change; orders broadcast updates.
    pub sequence: u64,
}

impl CapacityCounter {
    #[must_use]
    pub fn new(event_id: EventId, capacity: u32) -> Self {
        Self {
            event_id,
            capacity,
            held: 0,
            sequence: 1,
        }
    }

    /// Slots still available.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.held)
    }

    /// Take one slot.
    ///
    /// # Errors
    /// Returns `CapacityExhausted` if no slot remains; the counter is unchanged.
    pub fn hold(&mut self) -> Result<()> {
        if self.held >= self.capacity {
            return Err(SelfRegError::CapacityExhausted(self.event_id));
        }
        self.held += 1;
        self.sequence += 1;
        Ok(())
    }

    /// Give one slot back.
    ///
    /// # Errors
    /// Returns `LedgerInvariant` if nothing is held. Callers guard double
    /// release through reservation state, so reaching this is a bug.
    pub fn release(&mut self) -> Result<()> {
        if self.held == 0 {
            return Err(SelfRegError::LedgerInvariant {
                reason: format!("release on {} with zero held", self.event_id),
            });
        }
        self.held -= 1;
        self.sequence += 1;
        Ok(())
    }

    /// Raise total capacity.
    ///
    /// # Errors
    /// Returns `CapacityDecrease` if `new_capacity` is below the current one.
    pub fn increase_to(&mut self, new_capacity: u32) -> Result<()> {
        if new_capacity < self.capacity {
            return Err(SelfRegError::CapacityDecrease {
                current: self.capacity,
                requested: new_capacity,
            });
        }
        if new_capacity != self.capacity {
            self.capacity = new_capacity;
            self.sequence += 1;
        }
        Ok(())
    }

    /// Snapshot for the broadcast channel.
    #[must_use]
    pub fn update(&self) -> CapacityUpdate {
        CapacityUpdate {
            event_id: self.event_id,
            remaining: self.remaining(),
            sequence: self.sequence,
        }
    }
}

/// Outbound realtime message: `{eventId, remaining, sequence}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityUpdate {
    pub event_id: EventId,
    pub remaining: u32,
    /// Monotonic per event. Receivers keep the highest seen.
    pub sequence: u64,
}

impl CapacityUpdate {
    /// Whether this update should replace `current` on a display.
    #[must_use]
    pub fn supersedes(&self, current: Option<&Self>) -> bool {
        current.is_none_or(|c| self.sequence > c.sequence)
    }
}

/// Receives counter changes after they are durably committed.
///
/// Called on the committing thread, after the transaction, so
/// implementations must not block.
pub trait CapacityObserver: Send + Sync {
    fn on_commit(&self, updates: &[CapacityUpdate]);
}

/// Observer that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CapacityObserver for NoopObserver {
    fn on_commit(&self, _updates: &[CapacityUpdate]) {}
}
