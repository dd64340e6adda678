//! Error types for the SelfReg engine.
//!
//! All errors use the `REG_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Event / capacity errors
//! - 2xx: Reservation state errors
//! - 3xx: Payment errors
//! - 4xx: Credential errors
//! - 5xx: Store / transaction errors
//! - 6xx: Broadcast errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{EventId, ReservationId, ReservationState};

/// Central error enum for all SelfReg operations.
#[derive(Debug, Error)]
pub enum SelfRegError {
    // =================================================================
    // Event / Capacity Errors (1xx)
    // =================================================================
    /// The requested event does not exist.
    #[error("REG_ERR_100: Event not found: {0}")]
    EventNotFound(EventId),

    /// An event with this ID has already been published.
    #[error("REG_ERR_101: Event already exists: {0}")]
    EventAlreadyExists(EventId),

    /// The event definition is malformed (window ordering, etc.).
    #[error("REG_ERR_102: Invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// The registration window is not open at this instant.
    #[error("REG_ERR_103: Registration closed for event {0}")]
    RegistrationClosed(EventId),

    /// Every slot of the event is held. Expected, not a fault.
    #[error("REG_ERR_104: Capacity exhausted for event {0}")]
    CapacityExhausted(EventId),

    /// Capacity may only grow, and never below the held count.
    #[error("REG_ERR_105: Capacity cannot decrease: current {current}, requested {requested}")]
    CapacityDecrease { current: u32, requested: u32 },

    // =================================================================
    // Reservation State Errors (2xx)
    // =================================================================
    /// The requested reservation does not exist.
    #[error("REG_ERR_200: Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The requested transition is not legal from the current state.
    #[error("REG_ERR_201: Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: ReservationId,
        from: ReservationState,
        to: ReservationState,
    },

    /// The reservation no longer holds a slot (release called twice).
    #[error("REG_ERR_202: Slot already released for reservation {0}")]
    SlotAlreadyReleased(ReservationId),

    /// The reservation has already been redeemed at the door.
    #[error("REG_ERR_203: Reservation already redeemed: {0}")]
    AlreadyRedeemed(ReservationId),

    /// The reservation has already been cancelled.
    #[error("REG_ERR_204: Reservation already cancelled: {0}")]
    AlreadyCancelled(ReservationId),

    /// The reservation expired before the operation could apply.
    #[error("REG_ERR_205: Reservation expired: {0}")]
    ReservationExpired(ReservationId),

    // =================================================================
    // Payment Errors (3xx)
    // =================================================================
    /// The payment webhook payload is malformed or missing required fields.
    #[error("REG_ERR_300: Invalid payment event: {reason}")]
    InvalidPaymentEvent { reason: String },

    // =================================================================
    // Credential Errors (4xx)
    // =================================================================
    /// Signature or format failure. Treated as a security event.
    #[error("REG_ERR_400: Invalid credential: {reason}")]
    InvalidCredential { reason: String },

    /// Credentials may only be issued for CONFIRMED reservations.
    #[error("REG_ERR_401: Reservation {id} is {state}, credential requires CONFIRMED")]
    NotIssuable {
        id: ReservationId,
        state: ReservationState,
    },

    // =================================================================
    // Store / Transaction Errors (5xx)
    // =================================================================
    /// A concurrent commit touched a row this transaction read. Transient.
    #[error("REG_ERR_500: Transaction conflict")]
    TransactionConflict,

    /// The transaction kept conflicting past the configured retry budget.
    #[error("REG_ERR_501: Transaction retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The store is in a state that violates a ledger invariant.
    #[error("REG_ERR_502: Ledger invariant violation: {reason}")]
    LedgerInvariant { reason: String },

    // =================================================================
    // Broadcast Errors (6xx)
    // =================================================================
    /// The event already has the maximum number of display subscribers.
    #[error("REG_ERR_600: Subscriber limit reached for event {event_id} (max {max})")]
    SubscriberLimitReached { event_id: EventId, max: usize },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("REG_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("REG_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("REG_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("REG_ERR_903: I/O error: {0}")]
    Io(String),
}

impl SelfRegError {
    /// Whether the failure is store contention that a retry may clear.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransactionConflict)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, SelfRegError>;

impl From<std::io::Error> for SelfRegError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SelfRegError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = SelfRegError::EventNotFound(EventId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("REG_ERR_100"), "Got: {msg}");
    }

    #[test]
    fn invalid_transition_display() {
        let err = SelfRegError::InvalidTransition {
            id: ReservationId::new(),
            from: ReservationState::Redeemed,
            to: ReservationState::Cancelled,
        };
        let msg = format!("{err}");
        assert!(msg.contains("REG_ERR_201"));
        assert!(msg.contains("REDEEMED"));
        assert!(msg.contains("CANCELLED"));
    }

    #[test]
    fn only_conflicts_are_transient() {
        assert!(SelfRegError::TransactionConflict.is_transient());
        assert!(!SelfRegError::CapacityExhausted(EventId::new()).is_transient());
        assert!(!SelfRegError::RetriesExhausted { attempts: 3 }.is_transient());
    }

    #[test]
    fn all_errors_have_reg_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(SelfRegError::CapacityExhausted(EventId::new())),
            Box::new(SelfRegError::AlreadyRedeemed(ReservationId::new())),
            Box::new(SelfRegError::TransactionConflict),
            Box::new(SelfRegError::Internal("test".into())),
            Box::new(SelfRegError::InvalidCredential {
                reason: "bad".into(),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("REG_ERR_"),
                "Error missing REG_ERR_ prefix: {msg}"
            );
        }
    }
}
