//! Eager expiry sweep.
//!
//! One pass scans the `(event, PENDING)` index of every event, skips holds
//! whose committed expiry instant is still ahead, and expires each overdue
//! hold in its own transaction. A hold that a concurrent payment
//! confirmed (or a lazy access already expired) in the meantime is skipped:
//! the per-candidate transaction re-reads the row and applies the same
//! [`Reservation::is_expired_at`](selfreg_types::Reservation::is_expired_at)
//! check the other paths use.

use serde::Serialize;
use selfreg_types::{ReservationState, Result};
use tracing::{info, warn};

use crate::{
    state_machine::ReservationMachine,
    store::{Row, RowKey, Versioned},
};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// PENDING reservations found in the index.
    pub pending: usize,
    /// Overdue holds a transaction was opened for.
    pub examined: usize,
    /// Reservations moved to EXPIRED by this pass.
    pub expired: usize,
    /// Candidates whose transaction failed; retried next pass.
    pub errors: usize,
}

/// Expire up to `limit` overdue PENDING holds.
///
/// # Errors
/// Only index scan failures. Per-reservation failures are counted in the
/// report and logged.
pub fn sweep_expired(machine: &ReservationMachine, limit: usize) -> Result<SweepReport> {
    let runner = machine.ledger().runner();
    let store = runner.store();
    let now = runner.now();
    let mut report = SweepReport::default();

    'events: for event_id in store.event_ids()? {
        for id in store.reservations_by_state(event_id, ReservationState::Pending)? {
            if report.expired >= limit {
                break 'events;
            }
            report.pending += 1;
            let overdue = match store.get(&RowKey::Reservation(id)) {
                Ok(Some(Versioned {
                    row: Row::Reservation(r),
                    ..
                })) => r.is_expired_at(now),
                Ok(_) => false,
                Err(err) => {
                    report.errors += 1;
                    warn!(reservation = %id, error = %err, "sweep could not read reservation");
                    continue;
                }
            };
            if !overdue {
                continue;
            }
            report.examined += 1;
            let outcome = runner.run("sweep_expire", |txn| {
                let Some(mut reservation) = txn.reservation(id)? else {
                    return Ok(false);
                };
                machine.expire_in(txn, &mut reservation, now)
            });
            match outcome {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(err) => {
                    report.errors += 1;
                    warn!(reservation = %id, error = %err, "sweep could not expire reservation");
                }
            }
        }
    }

    if report.expired > 0 || report.errors > 0 {
        info!(
            pending = report.pending,
            examined = report.examined,
            expired = report.expired,
            errors = report.errors,
            "expiry sweep"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use selfreg_types::{
        HolderId, IdempotencyKey, ManualClock, NewEvent, NoopObserver, RetryConfig,
    };

    use super::*;
    use crate::{
        slot_ledger::SlotLedger,
        store::{MemoryStore, Store},
        txn::TxnRunner,
    };

    fn machine() -> (ReservationMachine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let runner = Arc::new(TxnRunner::new(
            store,
            clock.clone(),
            RetryConfig::default(),
            Arc::new(NoopObserver),
        ));
        (
            ReservationMachine::new(SlotLedger::new(runner, chrono::Duration::minutes(5))),
            clock,
        )
    }

    #[test]
    fn sweep_expires_only_overdue_holds() {
        let (machine, clock) = machine();
        let ledger = machine.ledger();
        let event = ledger.publish_event(&NewEvent::dummy(3)).unwrap().id;

        let old = ledger.try_reserve(event, HolderId::new()).unwrap();
        clock.advance(chrono::Duration::minutes(3));
        let young = ledger.try_reserve(event, HolderId::new()).unwrap();
        clock.advance(chrono::Duration::minutes(2));

        let report = sweep_expired(&machine, 100).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.pending, 2);
        assert_eq!(report.examined, 1);
        assert_eq!(machine.get(old.id).unwrap().state, ReservationState::Expired);
        assert_eq!(machine.get(young.id).unwrap().state, ReservationState::Pending);
        assert_eq!(ledger.current_remaining(event).unwrap(), 2);
    }

    #[test]
    fn sweep_skips_confirmed() {
        let (machine, clock) = machine();
        let ledger = machine.ledger();
        let event = ledger.publish_event(&NewEvent::dummy(1)).unwrap().id;
        let r = ledger.try_reserve(event, HolderId::new()).unwrap();

        let now = ledger.runner().now();
        ledger
            .runner()
            .run("confirm", |txn| {
                let mut r = machine.load_in(txn, r.id, now)?;
                machine.confirm_in(txn, &mut r, IdempotencyKey::new("pay_9")?, now)
            })
            .unwrap();

        clock.advance(chrono::Duration::hours(1));
        let report = sweep_expired(&machine, 100).unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(ledger.current_remaining(event).unwrap(), 0);
    }

    #[test]
    fn sweep_respects_limit() {
        let (machine, clock) = machine();
        let ledger = machine.ledger();
        let event = ledger.publish_event(&NewEvent::dummy(4)).unwrap().id;
        for _ in 0..4 {
            ledger.try_reserve(event, HolderId::new()).unwrap();
        }
        clock.advance(chrono::Duration::minutes(6));

        assert_eq!(sweep_expired(&machine, 3).unwrap().expired, 3);
        assert_eq!(sweep_expired(&machine, 3).unwrap().expired, 1);
        assert_eq!(ledger.current_remaining(event).unwrap(), 4);
    }

    #[test]
    fn sweep_is_idempotent() {
        let (machine, clock) = machine();
        let ledger = machine.ledger();
        let event = ledger.publish_event(&NewEvent::dummy(1)).unwrap().id;
        ledger.try_reserve(event, HolderId::new()).unwrap();
        clock.advance(chrono::Duration::minutes(5));

        assert_eq!(sweep_expired(&machine, 10).unwrap().expired, 1);
        assert_eq!(sweep_expired(&machine, 10).unwrap().expired, 0);
        assert_eq!(ledger.current_remaining(event).unwrap(), 1);
    }
}
