//! # Reservation: one attendee's claim on one slot
//!
//! The same record is read two ways: the Slot Ledger asks whether it
//! [holds a slot](ReservationState::holds_slot); the state machine asks which
//! transitions are legal. There is never a second copy to drift.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  payment ok  ┌───────────┐  scanned   ┌──────────┐
//!   │ PENDING ├─────────────▶│ CONFIRMED ├───────────▶│ REDEEMED │
//!   └──┬───┬──┘              └─────┬─────┘            └──────────┘
//!      │   │ timeout               │ cancel / refund
//!      │   ▼                       ▼
//!      │ ┌─────────┐          ┌───────────┐
//!      │ │ EXPIRED │          │ CANCELLED │
//!      │ └─────────┘          └───────────┘
//!      └──────── cancel ──────────▲
//! ```
//!
//! REDEEMED, EXPIRED and CANCELLED are terminal. REDEEMED still counts
//! against capacity (the seat was used); EXPIRED and CANCELLED do not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, HolderId, IdempotencyKey, ReservationId, Result, SelfRegError};

/// Lifecycle state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    /// Slot held, awaiting payment. Carries an expiry instant.
    Pending,
    /// Payment settled. Slot held until redemption or refund.
    Confirmed,
    /// Credential scanned at the door. Terminal, still counted.
    Redeemed,
    /// Timed out without payment. Terminal, slot released.
    Expired,
    /// Explicitly cancelled. Terminal, slot released.
    Cancelled,
}

impl ReservationState {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Confirmed,
        Self::Redeemed,
        Self::Expired,
        Self::Cancelled,
    ];

    /// Whether a reservation in this state is counted against capacity.
    #[must_use]
    pub fn holds_slot(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed | Self::Redeemed)
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Redeemed | Self::Expired | Self::Cancelled)
    }

    /// Can a reservation in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (
                Self::Pending,
                Self::Confirmed | Self::Expired | Self::Cancelled
            ) | (Self::Confirmed, Self::Redeemed | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Redeemed => write!(f, "REDEEMED"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Issuance bookkeeping for the credential bound to a reservation.
///
/// Only the latest issuance sequence is valid at the door; re-issuing
/// supersedes every earlier token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStamp {
    /// Issuance sequence encoded in the live token.
    pub issued_seq: u64,
    /// When the live token was minted.
    pub issued_at: DateTime<Utc>,
    /// When the token was scanned, if it has been.
    pub redeemed_at: Option<DateTime<Utc>>,
}

/// A registration's claim on one slot of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub event_id: EventId,
    pub holder_id: HolderId,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    /// Set only while PENDING.
    pub expires_at: Option<DateTime<Utc>>,
    /// Idempotency key of the settlement that confirmed this reservation.
    pub payment_ref: Option<IdempotencyKey>,
    pub credential: Option<CredentialStamp>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// A fresh PENDING hold that expires `ttl` after `now`.
    #[must_use]
    pub fn pending(
        event_id: EventId,
        holder_id: HolderId,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            event_id,
            holder_id,
            state: ReservationState::Pending,
            created_at: now,
            expires_at: Some(now + ttl),
            payment_ref: None,
            credential: None,
            updated_at: now,
        }
    }

    /// The one expiry comparison every path uses: a PENDING reservation is
    /// expired once `now` reaches its expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state == ReservationState::Pending && self.expires_at.is_some_and(|at| now >= at)
    }

    /// Whether this reservation is counted against its event's capacity.
    #[must_use]
    pub fn holds_slot(&self) -> bool {
        self.state.holds_slot()
    }

    /// Move to `target`, enforcing the transition table.
    ///
    /// Leaving PENDING clears the expiry instant.
    ///
    /// # Errors
    /// - `AlreadyRedeemed` if the reservation is REDEEMED
    /// - `AlreadyCancelled` if the reservation is CANCELLED
    /// - `ReservationExpired` if the reservation is EXPIRED
    /// - `InvalidTransition` for any other illegal move
    pub fn transition(&mut self, target: ReservationState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(match self.state {
                ReservationState::Redeemed => SelfRegError::AlreadyRedeemed(self.id),
                ReservationState::Cancelled => SelfRegError::AlreadyCancelled(self.id),
                ReservationState::Expired => SelfRegError::ReservationExpired(self.id),
                from => SelfRegError::InvalidTransition {
                    id: self.id,
                    from,
                    to: target,
                },
            });
        }
        self.state = target;
        if target != ReservationState::Pending {
            self.expires_at = None;
        }
        self.updated_at = now;
        Ok(())
    }

    /// PENDING → CONFIRMED, recording the settling payment.
    ///
    /// # Errors
    /// Same as [`Reservation::transition`].
    pub fn confirm(&mut self, payment_ref: IdempotencyKey, now: DateTime<Utc>) -> Result<()> {
        self.transition(ReservationState::Confirmed, now)?;
        self.payment_ref = Some(payment_ref);
        Ok(())
    }

    /// CONFIRMED → REDEEMED, stamping the live credential.
    ///
    /// # Errors
    /// Same as [`Reservation::transition`].
    pub fn redeem(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(ReservationState::Redeemed, now)?;
        if let Some(stamp) = self.credential.as_mut() {
            stamp.redeemed_at = Some(now);
        }
        Ok(())
    }
}

/// Dummy reservation for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Reservation {
    /// A PENDING reservation with a ten-minute hold.
    pub fn dummy(event_id: EventId) -> Self {
        Self::pending(
            event_id,
            HolderId::new(),
            Utc::now(),
            chrono::Duration::minutes(10),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make() -> Reservation {
        Reservation::dummy(EventId::new())
    }

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::new(s).unwrap()
    }

    #[test]
    fn state_transitions_valid() {
        use ReservationState::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Expired));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Redeemed));
        assert!(Confirmed.can_transition_to(Cancelled));
    }

    #[test]
    fn state_transitions_invalid() {
        use ReservationState::*;
        assert!(!Pending.can_transition_to(Redeemed));
        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Confirmed.can_transition_to(Pending));
        for terminal in [Redeemed, Expired, Cancelled] {
            for target in ReservationState::ALL {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal} -> {target} must be illegal"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in ReservationState::ALL {
            let exits = ReservationState::ALL
                .iter()
                .filter(|to| from.can_transition_to(**to))
                .count();
            assert_eq!(from.is_terminal(), exits == 0, "{from}");
        }
    }

    #[test]
    fn slot_holding_view() {
        use ReservationState::*;
        assert!(Pending.holds_slot());
        assert!(Confirmed.holds_slot());
        assert!(Redeemed.holds_slot());
        assert!(!Expired.holds_slot());
        assert!(!Cancelled.holds_slot());
    }

    #[test]
    fn confirm_clears_expiry() {
        let mut r = make();
        assert!(r.expires_at.is_some());
        r.confirm(key("pay_1"), Utc::now()).unwrap();
        assert_eq!(r.state, ReservationState::Confirmed);
        assert!(r.expires_at.is_none());
        assert_eq!(r.payment_ref, Some(key("pay_1")));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let r = make();
        let at = r.expires_at.unwrap();
        assert!(!r.is_expired_at(at - chrono::Duration::milliseconds(1)));
        assert!(r.is_expired_at(at));
    }

    #[test]
    fn confirmed_never_reports_expired() {
        let mut r = make();
        let far = Utc::now() + chrono::Duration::days(30);
        r.confirm(key("pay_1"), Utc::now()).unwrap();
        assert!(!r.is_expired_at(far));
    }

    #[test]
    fn double_redeem_reports_already_redeemed() {
        let mut r = make();
        r.confirm(key("pay_1"), Utc::now()).unwrap();
        r.redeem(Utc::now()).unwrap();
        let err = r.redeem(Utc::now()).unwrap_err();
        assert!(matches!(err, SelfRegError::AlreadyRedeemed(id) if id == r.id));
    }

    #[test]
    fn redeemed_cannot_be_cancelled() {
        let mut r = make();
        r.confirm(key("pay_1"), Utc::now()).unwrap();
        r.redeem(Utc::now()).unwrap();
        let err = r
            .transition(ReservationState::Cancelled, Utc::now())
            .unwrap_err();
        assert!(matches!(err, SelfRegError::AlreadyRedeemed(_)));
    }

    #[test]
    fn expired_cannot_confirm() {
        let mut r = make();
        r.transition(ReservationState::Expired, Utc::now()).unwrap();
        let err = r.confirm(key("late"), Utc::now()).unwrap_err();
        assert!(matches!(err, SelfRegError::ReservationExpired(_)));
        assert!(r.payment_ref.is_none());
    }

    #[test]
    fn state_serializes_screaming_case() {
        let json = serde_json::to_string(&ReservationState::Confirmed).unwrap();
        assert_eq!(json, "\"CONFIRMED\"");
    }
}
