//! Payment Reconciliation Unit.
//!
//! Applies provider settlements at most once per idempotency key. The key is
//! written to the append-only payment log in the same transaction as the
//! reservation transition, so a crash or a concurrent redelivery can never
//! leave one without the other.
//!
//! ## Decision table
//!
//! ```text
//! key already logged                    → Duplicate (nothing written)
//! reservation missing                   → UnknownReservation  (refund owed if succeeded)
//! succeeded, PENDING, amount ok         → CONFIRMED
//! succeeded, PENDING, amount < price    → Underpaid           (refund owed)
//! succeeded, CONFIRMED | REDEEMED       → AlreadySettled      (refund owed)
//! succeeded, EXPIRED | CANCELLED        → PaymentAfterExpiry  (refund owed)
//! failed,    PENDING                    → per FailedPaymentPolicy
//! failed,    anything else              → stale, no change
//! ```
//!
//! Expiry is applied first, with the transaction's instant, so a payment
//! that lands after the hold's deadline is reported and never confirms.

use chrono::{DateTime, Utc};
use selfreg_ledger::{ReservationMachine, Txn};
use selfreg_types::{
    ApplyOutcome, FailedPaymentPolicy, PaymentDisposition, PaymentEvent, PaymentOutcome,
    PaymentRecord, RefundReason, Reservation, ReservationState, Result, SelfRegError,
};
use tracing::{debug, info, warn};

/// Consumes provider settlement events.
#[derive(Clone)]
pub struct PaymentReconciler {
    machine: ReservationMachine,
    policy: FailedPaymentPolicy,
}

impl PaymentReconciler {
    #[must_use]
    pub fn new(machine: ReservationMachine, policy: FailedPaymentPolicy) -> Self {
        Self { machine, policy }
    }

    /// Apply one provider event.
    ///
    /// Every business outcome, including duplicates and refunds owed, is an
    /// `Ok` value.
    ///
    /// # Errors
    /// Store failures and `RetriesExhausted` only.
    pub fn apply(&self, event: &PaymentEvent) -> Result<ApplyOutcome> {
        let runner = self.machine.ledger().runner();
        let now = runner.now();
        let outcome = runner.run("apply_payment", |txn| self.apply_in(txn, event, now))?;

        let key = event.idempotency_key.as_str();
        match &outcome {
            ApplyOutcome::Applied {
                reservation_id,
                state,
            } => info!(
                key,
                reservation = %reservation_id,
                outcome = %event.outcome,
                state = %state,
                "payment applied"
            ),
            ApplyOutcome::Duplicate { disposition } => {
                debug!(key, ?disposition, "duplicate payment event ignored");
            }
            ApplyOutcome::UnknownReservation => warn!(
                key,
                reservation = %event.reservation_id,
                outcome = %event.outcome,
                "payment references unknown reservation"
            ),
            ApplyOutcome::PaymentAfterExpiry {
                reservation_id,
                state,
            } => warn!(
                key,
                reservation = %reservation_id,
                state = %state,
                "payment after expiry, refund owed"
            ),
            ApplyOutcome::AlreadySettled { reservation_id } => warn!(
                key,
                reservation = %reservation_id,
                "reservation already settled by another payment, refund owed"
            ),
            ApplyOutcome::Underpaid {
                reservation_id,
                paid,
                price,
            } => warn!(
                key,
                reservation = %reservation_id,
                %paid,
                %price,
                "underpaid settlement, refund owed"
            ),
        }
        Ok(outcome)
    }

    /// Settlements recorded as owing a manual refund.
    ///
    /// # Errors
    /// Store failures.
    pub fn pending_refunds(&self) -> Result<Vec<PaymentRecord>> {
        self.machine.ledger().runner().store().refunds_owed()
    }

    /// Body of [`PaymentReconciler::apply`] inside an open transaction.
    ///
    /// # Errors
    /// Store failures.
    pub fn apply_in(
        &self,
        txn: &mut Txn<'_>,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        if let Some(record) = txn.payment(&event.idempotency_key)? {
            return Ok(ApplyOutcome::Duplicate {
                disposition: record.disposition,
            });
        }

        let Some(mut reservation) = txn.reservation(event.reservation_id)? else {
            let disposition = match event.outcome {
                PaymentOutcome::Succeeded => {
                    PaymentDisposition::RefundOwed(RefundReason::UnknownReservation)
                }
                PaymentOutcome::Failed => PaymentDisposition::Stale,
            };
            txn.put_payment(PaymentRecord::new(event, now, disposition));
            return Ok(ApplyOutcome::UnknownReservation);
        };

        self.machine.expire_in(txn, &mut reservation, now)?;
        let (disposition, outcome) = match event.outcome {
            PaymentOutcome::Succeeded => self.settle_in(txn, &mut reservation, event, now)?,
            PaymentOutcome::Failed => self.fail_in(txn, &mut reservation, now)?,
        };
        txn.put_payment(PaymentRecord::new(event, now, disposition));
        Ok(outcome)
    }

    fn settle_in(
        &self,
        txn: &mut Txn<'_>,
        reservation: &mut Reservation,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<(PaymentDisposition, ApplyOutcome)> {
        let id = reservation.id;
        match reservation.state {
            ReservationState::Pending => {
                let price = txn
                    .event(reservation.event_id)?
                    .ok_or(SelfRegError::EventNotFound(reservation.event_id))?
                    .price;
                if let Some(paid) = event.amount.filter(|paid| *paid < price) {
                    return Ok((
                        PaymentDisposition::RefundOwed(RefundReason::Underpaid),
                        ApplyOutcome::Underpaid {
                            reservation_id: id,
                            paid,
                            price,
                        },
                    ));
                }
                self.machine
                    .confirm_in(txn, reservation, event.idempotency_key.clone(), now)?;
                Ok((
                    PaymentDisposition::Confirmed,
                    ApplyOutcome::Applied {
                        reservation_id: id,
                        state: ReservationState::Confirmed,
                    },
                ))
            }
            ReservationState::Confirmed | ReservationState::Redeemed => Ok((
                PaymentDisposition::RefundOwed(RefundReason::AlreadySettled),
                ApplyOutcome::AlreadySettled { reservation_id: id },
            )),
            state @ (ReservationState::Expired | ReservationState::Cancelled) => Ok((
                PaymentDisposition::RefundOwed(RefundReason::PaymentAfterExpiry),
                ApplyOutcome::PaymentAfterExpiry {
                    reservation_id: id,
                    state,
                },
            )),
        }
    }

    fn fail_in(
        &self,
        txn: &mut Txn<'_>,
        reservation: &mut Reservation,
        now: DateTime<Utc>,
    ) -> Result<(PaymentDisposition, ApplyOutcome)> {
        let disposition = match (reservation.state, self.policy) {
            (ReservationState::Pending, FailedPaymentPolicy::KeepPending) => {
                PaymentDisposition::LeftPending
            }
            (ReservationState::Pending, FailedPaymentPolicy::Cancel) => {
                self.machine.cancel_in(txn, reservation, now)?;
                PaymentDisposition::Cancelled
            }
            _ => PaymentDisposition::Stale,
        };
        Ok((
            disposition,
            ApplyOutcome::Applied {
                reservation_id: reservation.id,
                state: reservation.state,
            },
        ))
    }
}
