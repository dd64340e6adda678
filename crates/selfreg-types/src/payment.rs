//! Payment settlement model.
//!
//! Provider callbacks arrive as loosely-typed JSON. They are parsed once, at
//! the boundary, into a closed [`PaymentEvent`]; everything past that point
//! deals only in typed outcomes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{IdempotencyKey, ReservationId, ReservationState, Result, SelfRegError};

/// The provider's final word on a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

impl std::fmt::Display for PaymentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Inbound webhook: `{idempotencyKey, reservationId, outcome, timestamp}`.
///
/// Unknown fields are ignored; missing required fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub idempotency_key: IdempotencyKey,
    pub reservation_id: ReservationId,
    pub outcome: PaymentOutcome,
    /// Provider-side time of the settlement.
    pub timestamp: DateTime<Utc>,
    /// Amount captured, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
}

impl PaymentEvent {
    /// Parse a provider webhook body.
    ///
    /// # Errors
    /// Returns `InvalidPaymentEvent` for malformed JSON, a missing required
    /// field, an unknown outcome, or a blank idempotency key.
    pub fn from_webhook_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| SelfRegError::InvalidPaymentEvent {
            reason: e.to_string(),
        })
    }
}

/// Why a settlement could not be honoured and money is owed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    /// The reservation was already terminal (expired or cancelled).
    PaymentAfterExpiry,
    /// A different payment already confirmed this reservation.
    AlreadySettled,
    /// Captured amount was below the event price.
    Underpaid,
    /// No such reservation exists.
    UnknownReservation,
}

impl std::fmt::Display for RefundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PaymentAfterExpiry => write!(f, "PAYMENT_AFTER_EXPIRY"),
            Self::AlreadySettled => write!(f, "ALREADY_SETTLED"),
            Self::Underpaid => write!(f, "UNDERPAID"),
            Self::UnknownReservation => write!(f, "UNKNOWN_RESERVATION"),
        }
    }
}

/// What applying a payment event did. Persisted with the idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum PaymentDisposition {
    /// PENDING → CONFIRMED.
    Confirmed,
    /// Failed payment under the cancel policy: PENDING → CANCELLED.
    Cancelled,
    /// Failed payment under the keep-pending policy; the hold expires normally.
    LeftPending,
    /// Failed payment for a reservation that is no longer PENDING.
    Stale,
    /// Manual reconciliation required.
    RefundOwed(RefundReason),
}

impl PaymentDisposition {
    #[must_use]
    pub fn refund_owed(&self) -> bool {
        matches!(self, Self::RefundOwed(_))
    }
}

/// Append-only log entry keyed by idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub idempotency_key: IdempotencyKey,
    pub reservation_id: ReservationId,
    pub outcome: PaymentOutcome,
    pub amount: Option<Decimal>,
    pub provider_timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub disposition: PaymentDisposition,
}

impl PaymentRecord {
    #[must_use]
    pub fn new(
        event: &PaymentEvent,
        received_at: DateTime<Utc>,
        disposition: PaymentDisposition,
    ) -> Self {
        Self {
            idempotency_key: event.idempotency_key.clone(),
            reservation_id: event.reservation_id,
            outcome: event.outcome,
            amount: event.amount,
            provider_timestamp: event.timestamp,
            received_at,
            disposition,
        }
    }
}

/// Typed result of `apply(paymentEvent)`.
///
/// None of these are faults; the webhook acknowledges all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event was recorded and the reservation advanced (or, for a
    /// failure, left as the policy dictates).
    Applied {
        reservation_id: ReservationId,
        state: ReservationState,
    },
    /// This idempotency key was already applied; nothing changed.
    Duplicate { disposition: PaymentDisposition },
    /// The referenced reservation does not exist.
    UnknownReservation,
    /// Payment succeeded for a reservation that was already terminal.
    PaymentAfterExpiry {
        reservation_id: ReservationId,
        state: ReservationState,
    },
    /// Payment succeeded for a reservation another payment already settled.
    AlreadySettled { reservation_id: ReservationId },
    /// Payment succeeded below the event price.
    Underpaid {
        reservation_id: ReservationId,
        paid: Decimal,
        price: Decimal,
    },
}

impl ApplyOutcome {
    /// Whether this outcome left money that must be handed back manually.
    #[must_use]
    pub fn requires_refund(&self) -> bool {
        matches!(
            self,
            Self::PaymentAfterExpiry { .. } | Self::AlreadySettled { .. } | Self::Underpaid { .. }
        )
    }
}

/// Dummy payment events for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl PaymentEvent {
    /// A payment event with a random idempotency key.
    pub fn dummy(reservation_id: ReservationId, outcome: PaymentOutcome) -> Self {
        let key = format!("evt_{:016x}", rand::random::<u64>());
        Self {
            idempotency_key: IdempotencyKey::new(key).expect("generated key is never blank"),
            reservation_id,
            outcome,
            timestamp: Utc::now(),
            amount: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_parses_and_ignores_unknown_fields() {
        let id = ReservationId::new();
        let body = format!(
            r#"{{"idempotencyKey":"evt_1","reservationId":"{}","outcome":"succeeded",
               "timestamp":"2026-01-01T10:00:00Z","livemode":false,"extra":{{"a":1}}}}"#,
            id.0
        );
        let event = PaymentEvent::from_webhook_json(body.as_bytes()).unwrap();
        assert_eq!(event.reservation_id, id);
        assert_eq!(event.outcome, PaymentOutcome::Succeeded);
        assert_eq!(event.idempotency_key.as_str(), "evt_1");
        assert!(event.amount.is_none());
    }

    #[test]
    fn webhook_missing_key_rejected() {
        let body = format!(
            r#"{{"reservationId":"{}","outcome":"failed","timestamp":"2026-01-01T10:00:00Z"}}"#,
            ReservationId::new().0
        );
        let err = PaymentEvent::from_webhook_json(body.as_bytes()).unwrap_err();
        assert!(matches!(err, SelfRegError::InvalidPaymentEvent { .. }));
    }

    #[test]
    fn webhook_unknown_outcome_rejected() {
        let body = format!(
            r#"{{"idempotencyKey":"k","reservationId":"{}","outcome":"pending","timestamp":"2026-01-01T10:00:00Z"}}"#,
            ReservationId::new().0
        );
        assert!(PaymentEvent::from_webhook_json(body.as_bytes()).is_err());
    }

    #[test]
    fn webhook_amount_is_decimal_string() {
        let body = format!(
            r#"{{"idempotencyKey":"k","reservationId":"{}","outcome":"succeeded","timestamp":"2026-01-01T10:00:00Z","amount":"25.00"}}"#,
            ReservationId::new().0
        );
        let event = PaymentEvent::from_webhook_json(body.as_bytes()).unwrap();
        assert_eq!(event.amount, Some(Decimal::new(2500, 2)));
    }

    #[test]
    fn refund_outcomes_flagged() {
        let id = ReservationId::new();
        assert!(
            ApplyOutcome::PaymentAfterExpiry {
                reservation_id: id,
                state: ReservationState::Expired
            }
            .requires_refund()
        );
        assert!(!ApplyOutcome::UnknownReservation.requires_refund());
        assert!(
            !ApplyOutcome::Duplicate {
                disposition: PaymentDisposition::Confirmed
            }
            .requires_refund()
        );
    }

    #[test]
    fn disposition_serde_roundtrip() {
        let d = PaymentDisposition::RefundOwed(RefundReason::Underpaid);
        let json = serde_json::to_string(&d).unwrap();
        let back: PaymentDisposition = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
        assert!(back.refund_owed());
    }
}
