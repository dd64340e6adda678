//! Event model: the capacity-limited thing attendees register for.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EventId, Result, SelfRegError};

/// Administrative request to publish an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    /// Caller-chosen identifier.
    pub id: EventId,
    /// Display name shown on kiosks.
    pub name: String,
    /// Total slots.
    pub capacity: u32,
    /// Price of one slot; a settlement below this is underpaid.
    pub price: Decimal,
    /// Registration opens at this instant (inclusive).
    pub opens_at: DateTime<Utc>,
    /// Registration closes at this instant (exclusive).
    pub closes_at: DateTime<Utc>,
}

impl NewEvent {
    /// Reject malformed definitions before they reach the ledger.
    ///
    /// # Errors
    /// Returns `InvalidEvent` for a blank name, a negative price, or a window
    /// that closes at or before it opens.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SelfRegError::InvalidEvent {
                reason: "name must not be blank".to_string(),
            });
        }
        if self.price.is_sign_negative() {
            return Err(SelfRegError::InvalidEvent {
                reason: format!("price {} is negative", self.price),
            });
        }
        if self.closes_at <= self.opens_at {
            return Err(SelfRegError::InvalidEvent {
                reason: format!(
                    "window closes at {} which is not after {}",
                    self.closes_at, self.opens_at
                ),
            });
        }
        Ok(())
    }
}

/// A published event. Immutable except for capacity increases, which live on
/// the capacity counter rather than here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub price: Decimal,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
}

impl Event {
    /// Build the published record from an admin request.
    #[must_use]
    pub fn publish(new_event: &NewEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: new_event.id,
            name: new_event.name.clone(),
            price: new_event.price,
            opens_at: new_event.opens_at,
            closes_at: new_event.closes_at,
            published_at: now,
        }
    }

    /// Whether registration accepts new reservations at `now`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.opens_at && now < self.closes_at
    }
}

/// Dummy event definitions for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl NewEvent {
    /// An event open from an hour ago for a day, priced at 25.00.
    pub fn dummy(capacity: u32) -> Self {
        let now = Utc::now();
        Self {
            id: EventId::new(),
            name: "Morning session".to_string(),
            capacity,
            price: Decimal::new(2500, 2),
            opens_at: now - chrono::Duration::hours(1),
            closes_at: now + chrono::Duration::days(1),
        }
    }
}
