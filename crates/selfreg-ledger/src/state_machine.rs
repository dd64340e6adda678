//! Reservation State Machine.
//!
//! Behavioural transitions over the same reservation rows the
//! [`SlotLedger`] counts. Every transition that changes whether a
//! reservation holds a slot goes through [`SlotLedger::release_in`], so the
//! counter moves in the same transaction as the state.
//!
//! ## Expiry
//!
//! Expiry is applied two ways, both through [`Reservation::is_expired_at`]:
//!
//! - lazily, by [`ReservationMachine::load_in`] whenever a reservation is
//!   touched
//! - eagerly, by the periodic sweep
//!
//! Whichever commits first wins. The loser re-reads a terminal or confirmed
//! row on retry and its transition becomes a no-op or a typed rejection.

use chrono::{DateTime, Utc};
use selfreg_types::{IdempotencyKey, Reservation, ReservationId, ReservationState, Result, SelfRegError};
use tracing::{debug, info};

use crate::{slot_ledger::SlotLedger, txn::Txn};

/// Lifecycle transitions for reservations.
#[derive(Clone)]
pub struct ReservationMachine {
    ledger: SlotLedger,
}

impl ReservationMachine {
    #[must_use]
    pub fn new(ledger: SlotLedger) -> Self {
        Self { ledger }
    }

    #[must_use]
    pub fn ledger(&self) -> &SlotLedger {
        &self.ledger
    }

    /// Read a reservation and apply lazy expiry.
    ///
    /// # Errors
    /// `ReservationNotFound`, or a store error.
    pub fn get(&self, id: ReservationId) -> Result<Reservation> {
        let now = self.ledger.runner().now();
        self.ledger
            .runner()
            .run("get_reservation", |txn| self.load_in(txn, id, now))
    }

    /// Cancel a PENDING or CONFIRMED reservation and release its slot.
    ///
    /// # Errors
    /// - `ReservationNotFound`
    /// - `AlreadyRedeemed`: a used seat never returns to capacity
    /// - `AlreadyCancelled`
    /// - `ReservationExpired`, including a PENDING hold found overdue
    pub fn cancel(&self, id: ReservationId) -> Result<Reservation> {
        let now = self.ledger.runner().now();
        let reservation = self.ledger.runner().run("cancel", |txn| {
            let mut reservation = txn
                .reservation(id)?
                .ok_or(SelfRegError::ReservationNotFound(id))?;
            match reservation.state {
                ReservationState::Redeemed => return Err(SelfRegError::AlreadyRedeemed(id)),
                ReservationState::Cancelled => return Err(SelfRegError::AlreadyCancelled(id)),
                ReservationState::Expired => return Err(SelfRegError::ReservationExpired(id)),
                ReservationState::Pending if reservation.is_expired_at(now) => {
                    return Err(SelfRegError::ReservationExpired(id));
                }
                ReservationState::Pending | ReservationState::Confirmed => {}
            }
            self.ledger
                .release_in(txn, &mut reservation, ReservationState::Cancelled, now)?;
            Ok(reservation)
        })?;
        info!(reservation = %id, event = %reservation.event_id, "reservation cancelled");
        Ok(reservation)
    }

    // -----------------------------------------------------------------
    // Transactional building blocks
    // -----------------------------------------------------------------

    /// Load `id` inside `txn`, expiring it first if it is an overdue
    /// PENDING hold.
    ///
    /// # Errors
    /// `ReservationNotFound`, or a store error.
    pub fn load_in(
        &self,
        txn: &mut Txn<'_>,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut reservation = txn
            .reservation(id)?
            .ok_or(SelfRegError::ReservationNotFound(id))?;
        self.expire_in(txn, &mut reservation, now)?;
        Ok(reservation)
    }

    /// PENDING → EXPIRED with slot release, if overdue at `now`.
    /// Returns whether the reservation expired.
    ///
    /// # Errors
    /// Store or ledger invariant errors.
    pub fn expire_in(
        &self,
        txn: &mut Txn<'_>,
        reservation: &mut Reservation,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !reservation.is_expired_at(now) {
            return Ok(false);
        }
        self.ledger
            .release_in(txn, reservation, ReservationState::Expired, now)?;
        debug!(reservation = %reservation.id, "expired");
        Ok(true)
    }

    /// PENDING → CONFIRMED. The slot stays held.
    ///
    /// # Errors
    /// The transition errors of [`Reservation::confirm`].
    pub fn confirm_in(
        &self,
        txn: &mut Txn<'_>,
        reservation: &mut Reservation,
        payment_ref: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<()> {
        reservation.confirm(payment_ref, now)?;
        txn.put_reservation(reservation.clone());
        debug!(reservation = %reservation.id, "confirmed");
        Ok(())
    }

    /// CONFIRMED → REDEEMED, exactly once. The slot stays held.
    ///
    /// # Errors
    /// `AlreadyRedeemed` on a second attempt, otherwise the transition errors
    /// of [`Reservation::redeem`].
    pub fn redeem_in(
        &self,
        txn: &mut Txn<'_>,
        reservation: &mut Reservation,
        now: DateTime<Utc>,
    ) -> Result<()> {
        reservation.redeem(now)?;
        txn.put_reservation(reservation.clone());
        debug!(reservation = %reservation.id, "redeemed");
        Ok(())
    }

    /// Cancel inside an existing transaction, releasing the slot if held.
    ///
    /// # Errors
    /// Same as [`SlotLedger::release_in`].
    pub fn cancel_in(
        &self,
        txn: &mut Txn<'_>,
        reservation: &mut Reservation,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ledger
            .release_in(txn, reservation, ReservationState::Cancelled, now)?;
        Ok(())
    }
}
