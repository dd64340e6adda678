//! Transactional row store.
//!
//! The engine needs exactly one thing from persistence: serializable
//! transactions over a handful of keyed tables. [`Store`] is that seam.
//! [`MemoryStore`] implements it in-process with optimistic concurrency:
//! every row carries a version, a transaction records the version of every
//! row it read, and commit succeeds only if none of them moved.
//!
//! ## Tables
//!
//! | Key | Row | Notes |
//! |-----|-----|-------|
//! | `Event(id)` | [`Event`] | immutable after publish |
//! | `Counter(id)` | [`CapacityCounter`] | the capacity row |
//! | `Reservation(id)` | [`Reservation`] | indexed by `(event_id, state)` |
//! | `Payment(key)` | [`PaymentRecord`] | append-only |
//! | `IssueSequence` | `u64` | global credential issuance sequence |

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Mutex, MutexGuard},
};

use selfreg_types::{
    CapacityCounter, Event, EventId, IdempotencyKey, PaymentRecord, Reservation, ReservationId,
    ReservationState, Result, SelfRegError,
};

/// Primary key of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum RowKey {
    Event(EventId),
    Counter(EventId),
    Reservation(ReservationId),
    Payment(IdempotencyKey),
    IssueSequence,
}

/// A stored row.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Event(Event),
    Counter(CapacityCounter),
    Reservation(Reservation),
    Payment(PaymentRecord),
    Sequence(u64),
}

impl Row {
    fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Counter(_) => "counter",
            Self::Reservation(_) => "reservation",
            Self::Payment(_) => "payment",
            Self::Sequence(_) => "sequence",
        }
    }
}

/// Version of an absent row. Real rows start at 1.
pub const ABSENT: u64 = 0;

/// A row together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub row: Row,
}

/// ACID row store with optimistic, serializable commits.
pub trait Store: Send + Sync {
    /// Read the committed version of a row.
    fn get(&self, key: &RowKey) -> Result<Option<Versioned>>;

    /// Atomically validate `reads` and apply `writes`.
    ///
    /// `reads` maps every key the transaction observed to the version it
    /// observed ([`ABSENT`] for a miss).
    ///
    /// # Errors
    /// - `TransactionConflict` if any read row has since changed
    /// - `LedgerInvariant` if a write would overwrite a payment record
    fn commit(&self, reads: &HashMap<RowKey, u64>, writes: Vec<(RowKey, Row)>) -> Result<()>;

    /// Secondary index: reservations of `event_id` currently in `state`.
    fn reservations_by_state(
        &self,
        event_id: EventId,
        state: ReservationState,
    ) -> Result<Vec<ReservationId>>;

    /// All published events.
    fn event_ids(&self) -> Result<Vec<EventId>>;

    /// Payment records whose disposition is `RefundOwed`.
    fn refunds_owed(&self) -> Result<Vec<PaymentRecord>>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    rows: HashMap<RowKey, Versioned>,
    by_state: BTreeMap<(EventId, ReservationState), BTreeSet<ReservationId>>,
    events: BTreeSet<EventId>,
    refunds: BTreeSet<IdempotencyKey>,
}

impl Inner {
    fn version_of(&self, key: &RowKey) -> u64 {
        self.rows.get(key).map_or(ABSENT, |v| v.version)
    }

    fn reindex(&mut self, previous: Option<&Row>, next: &Row) {
        match next {
            Row::Reservation(r) => {
                if let Some(Row::Reservation(old)) = previous {
                    if let Some(set) = self.by_state.get_mut(&(old.event_id, old.state)) {
                        set.remove(&old.id);
                    }
                }
                self.by_state
                    .entry((r.event_id, r.state))
                    .or_default()
                    .insert(r.id);
            }
            Row::Event(e) => {
                self.events.insert(e.id);
            }
            Row::Payment(p) if p.disposition.refund_owed() => {
                self.refunds.insert(p.idempotency_key.clone());
            }
            _ => {}
        }
    }
}

/// In-process [`Store`]. One commit lock; per-row versions.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| SelfRegError::Internal("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &RowKey) -> Result<Option<Versioned>> {
        Ok(self.lock()?.rows.get(key).cloned())
    }

    fn commit(&self, reads: &HashMap<RowKey, u64>, writes: Vec<(RowKey, Row)>) -> Result<()> {
        let mut inner = self.lock()?;

        for (key, seen) in reads {
            if inner.version_of(key) != *seen {
                return Err(SelfRegError::TransactionConflict);
            }
        }
        for (key, row) in &writes {
            if matches!(key, RowKey::Payment(_)) && inner.rows.contains_key(key) {
                return Err(SelfRegError::LedgerInvariant {
                    reason: format!("payment log is append-only ({} rewrite)", row.kind()),
                });
            }
        }

        for (key, row) in writes {
            let version = inner.version_of(&key) + 1;
            let previous = inner.rows.get(&key).map(|v| v.row.clone());
            inner.reindex(previous.as_ref(), &row);
            inner.rows.insert(key, Versioned { version, row });
        }
        Ok(())
    }

    fn reservations_by_state(
        &self,
        event_id: EventId,
        state: ReservationState,
    ) -> Result<Vec<ReservationId>> {
        Ok(self
            .lock()?
            .by_state
            .get(&(event_id, state))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn event_ids(&self) -> Result<Vec<EventId>> {
        Ok(self.lock()?.events.iter().copied().collect())
    }

    fn refunds_owed(&self) -> Result<Vec<PaymentRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .refunds
            .iter()
            .filter_map(|key| match inner.rows.get(&RowKey::Payment(key.clone())) {
                Some(Versioned {
                    row: Row::Payment(p),
                    ..
                }) => Some(p.clone()),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use selfreg_types::{PaymentDisposition, PaymentEvent, PaymentOutcome, RefundReason};

    fn reservation_row(r: &Reservation) -> (RowKey, Row) {
        (RowKey::Reservation(r.id), Row::Reservation(r.clone()))
    }

    #[test]
    fn blind_write_then_read() {
        let store = MemoryStore::new();
        let r = Reservation::dummy(EventId::new());
        store
            .commit(&HashMap::new(), vec![reservation_row(&r)])
            .unwrap();
        let got = store.get(&RowKey::Reservation(r.id)).unwrap().unwrap();
        assert_eq!(got.version, 1);
        assert_eq!(got.row, Row::Reservation(r));
    }

    #[test]
    fn stale_read_conflicts() {
        let store = MemoryStore::new();
        let counter = CapacityCounter::new(EventId::new(), 1);
        let key = RowKey::Counter(counter.event_id);
        store
            .commit(&HashMap::new(), vec![(key.clone(), Row::Counter(counter))])
            .unwrap();

        let reads = HashMap::from([(key.clone(), 1)]);
        store
            .commit(&reads, vec![(key.clone(), Row::Counter(counter))])
            .unwrap();

        // A second writer that also read version 1 must lose.
        let err = store
            .commit(&reads, vec![(key, Row::Counter(counter))])
            .unwrap_err();
        assert!(matches!(err, SelfRegError::TransactionConflict));
    }

    #[test]
    fn absent_read_conflicts_with_insert() {
        let store = MemoryStore::new();
        let r = Reservation::dummy(EventId::new());
        let key = RowKey::Reservation(r.id);
        let reads = HashMap::from([(key.clone(), ABSENT)]);
        store.commit(&reads, vec![reservation_row(&r)]).unwrap();
        assert!(store.commit(&reads, vec![reservation_row(&r)]).is_err());
    }

    #[test]
    fn state_index_follows_updates() {
        let store = MemoryStore::new();
        let event = EventId::new();
        let mut r = Reservation::dummy(event);
        store
            .commit(&HashMap::new(), vec![reservation_row(&r)])
            .unwrap();
        assert_eq!(
            store
                .reservations_by_state(event, ReservationState::Pending)
                .unwrap(),
            vec![r.id]
        );

        r.transition(ReservationState::Expired, Utc::now()).unwrap();
        store
            .commit(&HashMap::new(), vec![reservation_row(&r)])
            .unwrap();
        assert!(
            store
                .reservations_by_state(event, ReservationState::Pending)
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            store
                .reservations_by_state(event, ReservationState::Expired)
                .unwrap(),
            vec![r.id]
        );
    }

    #[test]
    fn payment_log_is_append_only() {
        let store = MemoryStore::new();
        let event = PaymentEvent::dummy(ReservationId::new(), PaymentOutcome::Succeeded);
        let record = PaymentRecord::new(
            &event,
            Utc::now(),
            PaymentDisposition::RefundOwed(RefundReason::UnknownReservation),
        );
        let key = RowKey::Payment(event.idempotency_key.clone());
        store
            .commit(&HashMap::new(), vec![(key.clone(), Row::Payment(record.clone()))])
            .unwrap();
        let err = store
            .commit(&HashMap::new(), vec![(key, Row::Payment(record.clone()))])
            .unwrap_err();
        assert!(matches!(err, SelfRegError::LedgerInvariant { .. }));
        assert_eq!(store.refunds_owed().unwrap(), vec![record]);
    }
}
