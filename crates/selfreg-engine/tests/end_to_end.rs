//! End-to-end tests across all planes.
//!
//! These drive the assembled [`Engine`] the way the request surface does:
//! reserve -> pay -> issue -> scan, with expiry, duplicates and races mixed
//! in. Each test builds its own engine over a fresh in-memory store and a
//! manual clock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use selfreg_engine::Engine;
use selfreg_ledger::MemoryStore;
use selfreg_types::{
    ApplyOutcome, EngineConfig, EventId, HolderId, ManualClock, NewEvent, PaymentEvent,
    PaymentOutcome, ReservationState, RetryConfig, SelfRegError, VerifyReason,
};

struct Harness {
    engine: Engine,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = EngineConfig {
            reservation_ttl_secs: 600,
            retry: RetryConfig {
                max_attempts: 100,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
            },
            ..EngineConfig::default()
        };
        let engine = Engine::new(config, Arc::new(MemoryStore::new()), clock.clone()).unwrap();
        Self { engine, clock }
    }

    fn event(&self, capacity: u32) -> EventId {
        self.engine.publish_event(&NewEvent::dummy(capacity)).unwrap().id
    }

    fn pay(&self, reservation: selfreg_types::ReservationId) -> ApplyOutcome {
        self.engine
            .apply_payment(&PaymentEvent::dummy(reservation, PaymentOutcome::Succeeded))
            .unwrap()
    }

    fn past_ttl(&self) {
        self.clock.advance(Duration::seconds(601));
    }
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

#[test]
fn concurrent_reservations_never_exceed_capacity() {
    let h = Harness::new();
    let capacity = 7;
    let event = h.event(capacity);

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..24)
            .map(|_| s.spawn(|| h.engine.try_reserve(event, HolderId::new())))
            .collect();
        handles.into_iter().map(|j| j.join().unwrap()).collect()
    });

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, capacity as usize);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, SelfRegError::CapacityExhausted(_)))
    );
    assert_eq!(h.engine.current_remaining(event).unwrap(), 0);
}

#[test]
fn last_slot_race_has_one_winner() {
    let h = Harness::new();
    let event = h.event(1);

    let (a, b) = std::thread::scope(|s| {
        let a = s.spawn(|| h.engine.try_reserve(event, HolderId::new()));
        let b = s.spawn(|| h.engine.try_reserve(event, HolderId::new()));
        (a.join().unwrap(), b.join().unwrap())
    });

    let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
    let winner = winner.unwrap();
    assert_eq!(winner.state, ReservationState::Pending);
    assert!(matches!(loser, Err(SelfRegError::CapacityExhausted(id)) if id == event));
    assert_eq!(h.engine.current_remaining(event).unwrap(), 0);
}

#[test]
fn exhausted_event_reclaims_overdue_hold() {
    let h = Harness::new();
    let event = h.event(1);
    let stale = h.engine.try_reserve(event, HolderId::new()).unwrap();

    h.past_ttl();
    let fresh = h.engine.try_reserve(event, HolderId::new()).unwrap();
    assert_ne!(fresh.id, stale.id);
    assert_eq!(
        h.engine.get_reservation(stale.id).unwrap().state,
        ReservationState::Expired
    );
    assert_eq!(h.engine.current_remaining(event).unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[test]
fn duplicate_payment_is_reported_and_inert() {
    let h = Harness::new();
    let event = h.event(2);
    let r = h.engine.try_reserve(event, HolderId::new()).unwrap();
    let payment = PaymentEvent::dummy(r.id, PaymentOutcome::Succeeded);

    let first = h.engine.apply_payment(&payment).unwrap();
    assert!(matches!(first, ApplyOutcome::Applied { state: ReservationState::Confirmed, .. }));
    let before = h.engine.get_reservation(r.id).unwrap();

    let second = h.engine.apply_payment(&payment).unwrap();
    assert!(matches!(second, ApplyOutcome::Duplicate { .. }));
    assert_eq!(h.engine.get_reservation(r.id).unwrap(), before);
    assert_eq!(h.engine.current_remaining(event).unwrap(), 1);
}

#[test]
fn payment_after_expiry_never_confirms() {
    let h = Harness::new();
    let event = h.event(1);
    let r = h.engine.try_reserve(event, HolderId::new()).unwrap();

    h.past_ttl();
    let outcome = h.pay(r.id);
    assert!(matches!(
        outcome,
        ApplyOutcome::PaymentAfterExpiry { state: ReservationState::Expired, .. }
    ));
    assert!(outcome.requires_refund());
    assert_eq!(
        h.engine.get_reservation(r.id).unwrap().state,
        ReservationState::Expired
    );
    assert_eq!(h.engine.current_remaining(event).unwrap(), 1);

    let refunds = h.engine.pending_refunds().unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].reservation_id, r.id);
}

#[test]
fn sweep_racing_late_payment_never_confirms() {
    for _ in 0..25 {
        let h = Harness::new();
        let event = h.event(1);
        let r = h.engine.try_reserve(event, HolderId::new()).unwrap();
        h.past_ttl();

        let (report, outcome) = std::thread::scope(|s| {
            let sweep = s.spawn(|| h.engine.sweep_once());
            let pay = s.spawn(|| h.pay(r.id));
            (sweep.join().unwrap(), pay.join().unwrap())
        });

        assert!(report.unwrap().expired <= 1);
        assert!(matches!(
            outcome,
            ApplyOutcome::PaymentAfterExpiry { state: ReservationState::Expired, .. }
        ));
        assert_eq!(
            h.engine.get_reservation(r.id).unwrap().state,
            ReservationState::Expired
        );
        assert_eq!(h.engine.current_remaining(event).unwrap(), 1);
        assert_eq!(h.engine.pending_refunds().unwrap().len(), 1);
    }
}

#[test]
fn underpayment_leaves_reservation_pending() {
    let h = Harness::new();
    let event = h.event(1);
    let r = h.engine.try_reserve(event, HolderId::new()).unwrap();
    let mut payment = PaymentEvent::dummy(r.id, PaymentOutcome::Succeeded);
    payment.amount = Some(Decimal::new(1000, 2));

    let outcome = h.engine.apply_payment(&payment).unwrap();
    assert!(matches!(outcome, ApplyOutcome::Underpaid { .. }));
    assert_eq!(
        h.engine.get_reservation(r.id).unwrap().state,
        ReservationState::Pending
    );
}

// ---------------------------------------------------------------------------
// Door
// ---------------------------------------------------------------------------

#[test]
fn credential_redeems_exactly_once() {
    let h = Harness::new();
    let event = h.event(1);
    let r = h.engine.try_reserve(event, HolderId::new()).unwrap();
    h.pay(r.id);
    let token = h.engine.issue_credential(r.id).unwrap().encode();

    let first = h.engine.verify_credential(&token).unwrap();
    assert!(first.valid);
    assert_eq!(first.reason, VerifyReason::Admitted);
    assert_eq!(
        h.engine.get_reservation(r.id).unwrap().state,
        ReservationState::Redeemed
    );

    let second = h.engine.verify_credential(&token).unwrap();
    assert!(!second.valid);
    assert_eq!(second.reason, VerifyReason::AlreadyRedeemed);
}

#[test]
fn cancelling_redeemed_reservation_keeps_counter() {
    let h = Harness::new();
    let event = h.event(2);
    let r = h.engine.try_reserve(event, HolderId::new()).unwrap();
    h.pay(r.id);
    let token = h.engine.issue_credential(r.id).unwrap().encode();
    assert!(h.engine.verify_credential(&token).unwrap().valid);
    let remaining = h.engine.current_remaining(event).unwrap();

    assert!(matches!(
        h.engine.cancel(r.id),
        Err(SelfRegError::AlreadyRedeemed(_))
    ));
    assert_eq!(h.engine.current_remaining(event).unwrap(), remaining);
    assert_eq!(remaining, 1);
}

#[test]
fn reissued_credential_supersedes_previous() {
    let h = Harness::new();
    let event = h.event(1);
    let r = h.engine.try_reserve(event, HolderId::new()).unwrap();
    h.pay(r.id);
    let old = h.engine.issue_credential(r.id).unwrap().encode();
    let new = h.engine.issue_credential(r.id).unwrap().encode();

    let stale = h.engine.verify_credential(&old).unwrap();
    assert_eq!(stale.reason, VerifyReason::Superseded);
    assert!(h.engine.verify_credential(&new).unwrap().valid);
}

#[test]
fn credential_from_another_engine_is_rejected() {
    let h = Harness::new();
    let other = Harness::new();
    let event = other.event(1);
    let r = other.engine.try_reserve(event, HolderId::new()).unwrap();
    other.pay(r.id);
    let foreign = other.engine.issue_credential(r.id).unwrap().encode();

    let verification = h.engine.verify_credential(&foreign).unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.reason, VerifyReason::InvalidCredential);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn full_lifecycle_keeps_slot_taken() {
    let h = Harness::new();
    let event = h.event(1);

    let r = h.engine.try_reserve(event, HolderId::new()).unwrap();
    assert_eq!(h.engine.current_remaining(event).unwrap(), 0);

    assert!(matches!(h.pay(r.id), ApplyOutcome::Applied { .. }));
    assert_eq!(
        h.engine.get_reservation(r.id).unwrap().state,
        ReservationState::Confirmed
    );
    assert_eq!(h.engine.current_remaining(event).unwrap(), 0);

    let token = h.engine.issue_credential(r.id).unwrap().encode();
    assert_eq!(h.engine.current_remaining(event).unwrap(), 0);

    assert!(h.engine.verify_credential(&token).unwrap().valid);
    assert_eq!(
        h.engine.get_reservation(r.id).unwrap().state,
        ReservationState::Redeemed
    );
    assert_eq!(h.engine.current_remaining(event).unwrap(), 0);

    // Confirmed holds survive the TTL.
    h.past_ttl();
    h.engine.sweep_once().unwrap();
    assert_eq!(h.engine.current_remaining(event).unwrap(), 0);
}

#[test]
fn unpaid_reservation_is_swept() {
    let h = Harness::new();
    let event = h.event(1);
    let r = h.engine.try_reserve(event, HolderId::new()).unwrap();
    assert_eq!(h.engine.current_remaining(event).unwrap(), 0);

    h.past_ttl();
    let report = h.engine.sweep_once().unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(
        h.engine.get_reservation(r.id).unwrap().state,
        ReservationState::Expired
    );
    assert_eq!(h.engine.current_remaining(event).unwrap(), 1);
}

#[tokio::test]
async fn display_sees_snapshot_then_changes() {
    let h = Harness::new();
    let event = h.event(2);
    let mut display = h.engine.subscribe(event).unwrap();

    let snapshot = display.recv().await.unwrap();
    assert_eq!(snapshot.remaining, 2);

    let r = h.engine.try_reserve(event, HolderId::new()).unwrap();
    let after_hold = display.recv().await.unwrap();
    assert_eq!(after_hold.remaining, 1);
    assert!(after_hold.sequence > snapshot.sequence);

    h.engine.cancel(r.id).unwrap();
    let after_cancel = display.recv().await.unwrap();
    assert_eq!(after_cancel.remaining, 2);
    assert!(after_cancel.sequence > after_hold.sequence);

    h.engine.increase_capacity(event, 5).unwrap();
    assert_eq!(display.recv().await.unwrap().remaining, 5);
}
