//! Globally unique identifiers used throughout SelfReg.
//!
//! Entity IDs use UUIDv7 for time-ordered lexicographic sorting. The
//! payment idempotency key is provider-assigned and kept as an opaque string.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{SelfRegError, constants};

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// Identifier of a capacity-limited event (or time slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt:{}", self.0)
    }
}

/// Accepts both the bare UUID and the `evt:` display form.
impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.strip_prefix("evt:").unwrap_or(s)).map(Self)
    }
}

// ---------------------------------------------------------------------------
// ReservationId
// ---------------------------------------------------------------------------

/// Globally unique reservation identifier. Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ReservationId(pub Uuid);

impl ReservationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReservationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// HolderId
// ---------------------------------------------------------------------------

/// Reference to the attendee identity holding a reservation.
///
/// Identity itself lives outside the engine; only the reference is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct HolderId(pub Uuid);

impl HolderId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// IdempotencyKey
// ---------------------------------------------------------------------------

/// Provider-assigned key guaranteeing at-most-once payment application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate and wrap a provider key.
    ///
    /// # Errors
    /// Returns `InvalidPaymentEvent` if the key is blank or longer than
    /// [`constants::MAX_IDEMPOTENCY_KEY_LEN`].
    pub fn new(key: impl Into<String>) -> crate::Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(SelfRegError::InvalidPaymentEvent {
                reason: "idempotency key must not be blank".to_string(),
            });
        }
        if key.len() > constants::MAX_IDEMPOTENCY_KEY_LEN {
            return Err(SelfRegError::InvalidPaymentEvent {
                reason: format!(
                    "idempotency key exceeds {} bytes",
                    constants::MAX_IDEMPOTENCY_KEY_LEN
                ),
            });
        }
        Ok(Self(key))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = SelfRegError;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_id_uniqueness() {
        let a = ReservationId::new();
        let b = ReservationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn reservation_id_ordering() {
        let a = ReservationId::new();
        let b = ReservationId::new();
        assert!(a < b);
    }

    #[test]
    fn event_id_display_prefix() {
        let id = EventId::new();
        assert!(id.to_string().starts_with("evt:"));
    }

    #[test]
    fn ids_parse_from_path_segments() {
        let event = EventId::new();
        assert_eq!(event.to_string().parse::<EventId>().unwrap(), event);
        assert_eq!(event.0.to_string().parse::<EventId>().unwrap(), event);

        let reservation = ReservationId::new();
        assert_eq!(
            reservation.to_string().parse::<ReservationId>().unwrap(),
            reservation
        );
        assert!("not-a-uuid".parse::<ReservationId>().is_err());
    }

    #[test]
    fn blank_idempotency_key_rejected() {
        assert!(IdempotencyKey::new("").is_err());
        assert!(IdempotencyKey::new("   ").is_err());
        assert!(IdempotencyKey::new("evt_1NqX").is_ok());
    }

    #[test]
    fn oversized_idempotency_key_rejected() {
        let key = "k".repeat(constants::MAX_IDEMPOTENCY_KEY_LEN + 1);
        let err = IdempotencyKey::new(key).unwrap_err();
        assert!(matches!(err, SelfRegError::InvalidPaymentEvent { .. }));
    }

    #[test]
    fn idempotency_key_deserialize_validates() {
        let ok: IdempotencyKey = serde_json::from_str("\"pi_123\"").unwrap();
        assert_eq!(ok.as_str(), "pi_123");
        assert!(serde_json::from_str::<IdempotencyKey>("\"\"").is_err());
    }
}
