//! Slot Ledger: the single source of truth for remaining capacity.
//!
//! Every hold and every release goes through here, inside a transaction
//! that also writes the reservation row. The counter and the reservation
//! state therefore never disagree, and concurrent `try_reserve` calls for
//! one event serialize on the counter row: at most one of two racing
//! commits that read the same counter version survives; the loser retries
//! against the new count.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use selfreg_types::{
    CapacityCounter, Event, EventId, HolderId, NewEvent, Reservation, ReservationId,
    ReservationState, Result, SelfRegError,
};
use tracing::{debug, info};

use crate::{
    store::{Row, RowKey},
    txn::{Txn, TxnRunner},
};

/// Capacity accounting over the shared store.
#[derive(Clone)]
pub struct SlotLedger {
    runner: Arc<TxnRunner>,
    ttl: chrono::Duration,
}

impl SlotLedger {
    /// `ttl` is the lifetime given to every new PENDING hold.
    #[must_use]
    pub fn new(runner: Arc<TxnRunner>, ttl: chrono::Duration) -> Self {
        Self { runner, ttl }
    }

    #[must_use]
    pub fn runner(&self) -> &Arc<TxnRunner> {
        &self.runner
    }

    // -----------------------------------------------------------------
    // Administrative
    // -----------------------------------------------------------------

    /// Publish an event and create its capacity counter.
    ///
    /// # Errors
    /// `InvalidEvent` for a malformed definition, `EventAlreadyExists` if the
    /// id is taken.
    pub fn publish_event(&self, new_event: &NewEvent) -> Result<Event> {
        new_event.validate()?;
        let now = self.runner.now();
        let event = self.runner.run("publish_event", |txn| {
            if txn.event(new_event.id)?.is_some() {
                return Err(SelfRegError::EventAlreadyExists(new_event.id));
            }
            let event = Event::publish(new_event, now);
            txn.put_event(event.clone());
            txn.put_counter(CapacityCounter::new(new_event.id, new_event.capacity));
            Ok(event)
        })?;
        info!(event = %event.id, capacity = new_event.capacity, "event published");
        Ok(event)
    }

    /// Raise an event's capacity. Decreases are rejected.
    ///
    /// # Errors
    /// `EventNotFound`, or `CapacityDecrease` if `new_capacity` is lower than
    /// the current capacity.
    pub fn increase_capacity(&self, event_id: EventId, new_capacity: u32) -> Result<CapacityCounter> {
        let counter = self.runner.run("increase_capacity", |txn| {
            let mut counter = load_counter(txn, event_id)?;
            counter.increase_to(new_capacity)?;
            txn.put_counter(counter);
            Ok(counter)
        })?;
        info!(event = %event_id, capacity = counter.capacity, remaining = counter.remaining(), "capacity increased");
        Ok(counter)
    }

    // -----------------------------------------------------------------
    // Contract: tryReserve / release / currentRemaining
    // -----------------------------------------------------------------

    /// Atomically take a slot and create a PENDING reservation.
    ///
    /// # Errors
    /// - `EventNotFound`
    /// - `RegistrationClosed` outside the event's window
    /// - `CapacityExhausted` when every slot is held, after reclaiming
    ///   overdue holds
    pub fn try_reserve(&self, event_id: EventId, holder_id: HolderId) -> Result<Reservation> {
        let now = self.runner.now();
        let reservation = self
            .runner
            .run("try_reserve", |txn| self.try_reserve_in(txn, event_id, holder_id, now))?;
        info!(
            reservation = %reservation.id,
            event = %event_id,
            expires_at = ?reservation.expires_at,
            "slot reserved"
        );
        Ok(reservation)
    }

    /// Release the slot held by `reservation_id`, cancelling it.
    ///
    /// # Errors
    /// - `ReservationNotFound`
    /// - `SlotAlreadyReleased` if the reservation no longer holds a slot
    /// - `AlreadyRedeemed` for a redeemed reservation, whose slot was used
    /// - `ReservationExpired` for a PENDING hold past its expiry instant
    pub fn release(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let now = self.runner.now();
        self.runner.run("release", |txn| {
            let mut reservation = txn
                .reservation(reservation_id)?
                .ok_or(SelfRegError::ReservationNotFound(reservation_id))?;
            if reservation.is_expired_at(now) {
                return Err(SelfRegError::ReservationExpired(reservation_id));
            }
            self.release_in(txn, &mut reservation, ReservationState::Cancelled, now)?;
            Ok(reservation)
        })
    }

    /// Slots still available for `event_id`, as of the last commit.
    ///
    /// # Errors
    /// `EventNotFound`.
    pub fn current_remaining(&self, event_id: EventId) -> Result<u32> {
        Ok(self.counter(event_id)?.remaining())
    }

    /// Committed counter row for `event_id`.
    ///
    /// # Errors
    /// `EventNotFound`.
    pub fn counter(&self, event_id: EventId) -> Result<CapacityCounter> {
        match self.runner.store().get(&RowKey::Counter(event_id))? {
            Some(versioned) => match versioned.row {
                Row::Counter(c) => Ok(c),
                _ => Err(SelfRegError::LedgerInvariant {
                    reason: format!("counter row for {event_id} has the wrong type"),
                }),
            },
            None => Err(SelfRegError::EventNotFound(event_id)),
        }
    }

    // -----------------------------------------------------------------
    // Transactional building blocks
    // -----------------------------------------------------------------

    /// Body of [`SlotLedger::try_reserve`], usable inside a larger transaction.
    ///
    /// # Errors
    /// Same as [`SlotLedger::try_reserve`].
    pub fn try_reserve_in(
        &self,
        txn: &mut Txn<'_>,
        event_id: EventId,
        holder_id: HolderId,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let event = txn
            .event(event_id)?
            .ok_or(SelfRegError::EventNotFound(event_id))?;
        if !event.is_open_at(now) {
            return Err(SelfRegError::RegistrationClosed(event_id));
        }

        let mut counter = load_counter(txn, event_id)?;
        if counter.remaining() == 0 && self.reclaim_overdue_in(txn, event_id, now)? > 0 {
            counter = load_counter(txn, event_id)?;
        }
        counter.hold()?;
        txn.put_counter(counter);

        let reservation = Reservation::pending(event_id, holder_id, now, self.ttl);
        txn.put_reservation(reservation.clone());
        debug!(
            reservation = %reservation.id,
            event = %event_id,
            remaining = counter.remaining(),
            sequence = counter.sequence,
            "hold"
        );
        Ok(reservation)
    }

    /// Move a slot-holding reservation to a slot-releasing terminal state and
    /// give its slot back.
    ///
    /// The guard against double release is the reservation's state, not the
    /// counter: a reservation that no longer holds a slot is rejected before
    /// the counter is touched.
    ///
    /// # Errors
    /// - `SlotAlreadyReleased` if the reservation no longer holds a slot
    /// - `InvalidTransition` if `target` does not release a slot
    /// - the transition errors of [`Reservation::transition`]
    pub fn release_in(
        &self,
        txn: &mut Txn<'_>,
        reservation: &mut Reservation,
        target: ReservationState,
        now: DateTime<Utc>,
    ) -> Result<CapacityCounter> {
        if !reservation.holds_slot() {
            return Err(SelfRegError::SlotAlreadyReleased(reservation.id));
        }
        if target.holds_slot() {
            return Err(SelfRegError::InvalidTransition {
                id: reservation.id,
                from: reservation.state,
                to: target,
            });
        }
        reservation.transition(target, now)?;

        let mut counter = load_counter(txn, reservation.event_id)?;
        counter.release()?;
        txn.put_counter(counter);
        txn.put_reservation(reservation.clone());
        debug!(
            reservation = %reservation.id,
            event = %reservation.event_id,
            state = %reservation.state,
            remaining = counter.remaining(),
            sequence = counter.sequence,
            "release"
        );
        Ok(counter)
    }

    /// Expire every overdue PENDING hold of `event_id` within `txn`.
    /// Returns how many slots came back.
    ///
    /// # Errors
    /// Store errors only.
    pub fn reclaim_overdue_in(
        &self,
        txn: &mut Txn<'_>,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut reclaimed = 0;
        for id in txn
            .store()
            .reservations_by_state(event_id, ReservationState::Pending)?
        {
            let Some(mut reservation) = txn.reservation(id)? else {
                continue;
            };
            if reservation.is_expired_at(now) {
                self.release_in(txn, &mut reservation, ReservationState::Expired, now)?;
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            debug!(event = %event_id, reclaimed, "reclaimed overdue holds on exhaustion");
        }
        Ok(reclaimed)
    }
}

fn load_counter(txn: &mut Txn<'_>, event_id: EventId) -> Result<CapacityCounter> {
    txn.counter(event_id)?
        .ok_or(SelfRegError::EventNotFound(event_id))
}
