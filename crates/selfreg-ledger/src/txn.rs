//! Transactions and the retrying runner.
//!
//! A [`Txn`] buffers writes and remembers the version of every row it read.
//! Nothing reaches the store until [`Txn::commit`]; dropping a `Txn` (or
//! returning an error from the closure given to [`TxnRunner::run`]) aborts
//! it with no side effects.
//!
//! Only `TransactionConflict` is retried. Every other error is a decided,
//! typed outcome and is returned to the caller on the first attempt.

use std::{collections::HashMap, sync::Arc, thread};

use chrono::{DateTime, Utc};
use rand::Rng;
use selfreg_types::{
    CapacityCounter, CapacityObserver, CapacityUpdate, Clock, Event, EventId, IdempotencyKey,
    PaymentRecord, Reservation, ReservationId, Result, RetryConfig, SelfRegError,
};
use tracing::{debug, warn};

use crate::store::{ABSENT, Row, RowKey, Store};

/// What a successful commit changed that observers care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Final counter state of every event whose counter was written.
    pub capacity_updates: Vec<CapacityUpdate>,
}

/// One optimistic transaction against a [`Store`].
pub struct Txn<'s> {
    store: &'s dyn Store,
    reads: HashMap<RowKey, u64>,
    writes: Vec<(RowKey, Row)>,
    index: HashMap<RowKey, usize>,
}

impl<'s> Txn<'s> {
    #[must_use]
    pub fn begin(store: &'s dyn Store) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            writes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// The store this transaction runs against, for index scans.
    #[must_use]
    pub fn store(&self) -> &'s dyn Store {
        self.store
    }

    fn read(&mut self, key: &RowKey) -> Result<Option<Row>> {
        if let Some(&slot) = self.index.get(key) {
            return Ok(Some(self.writes[slot].1.clone()));
        }
        let found = self.store.get(key)?;
        self.reads
            .entry(key.clone())
            .or_insert_with(|| found.as_ref().map_or(ABSENT, |v| v.version));
        Ok(found.map(|v| v.row))
    }

    fn write(&mut self, key: RowKey, row: Row) {
        if let Some(&slot) = self.index.get(&key) {
            self.writes[slot].1 = row;
        } else {
            self.index.insert(key.clone(), self.writes.len());
            self.writes.push((key, row));
        }
    }

    fn mismatch(key: &RowKey) -> SelfRegError {
        SelfRegError::LedgerInvariant {
            reason: format!("row under {key:?} has the wrong type"),
        }
    }

    pub fn event(&mut self, id: EventId) -> Result<Option<Event>> {
        let key = RowKey::Event(id);
        match self.read(&key)? {
            None => Ok(None),
            Some(Row::Event(e)) => Ok(Some(e)),
            Some(_) => Err(Self::mismatch(&key)),
        }
    }

    pub fn counter(&mut self, id: EventId) -> Result<Option<CapacityCounter>> {
        let key = RowKey::Counter(id);
        match self.read(&key)? {
            None => Ok(None),
            Some(Row::Counter(c)) => Ok(Some(c)),
            Some(_) => Err(Self::mismatch(&key)),
        }
    }

    pub fn reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let key = RowKey::Reservation(id);
        match self.read(&key)? {
            None => Ok(None),
            Some(Row::Reservation(r)) => Ok(Some(r)),
            Some(_) => Err(Self::mismatch(&key)),
        }
    }

    pub fn payment(&mut self, key: &IdempotencyKey) -> Result<Option<PaymentRecord>> {
        let key = RowKey::Payment(key.clone());
        match self.read(&key)? {
            None => Ok(None),
            Some(Row::Payment(p)) => Ok(Some(p)),
            Some(_) => Err(Self::mismatch(&key)),
        }
    }

    pub fn issue_sequence(&mut self) -> Result<u64> {
        let key = RowKey::IssueSequence;
        match self.read(&key)? {
            None => Ok(0),
            Some(Row::Sequence(n)) => Ok(n),
            Some(_) => Err(Self::mismatch(&key)),
        }
    }

    pub fn put_event(&mut self, event: Event) {
        self.write(RowKey::Event(event.id), Row::Event(event));
    }

    pub fn put_counter(&mut self, counter: CapacityCounter) {
        self.write(RowKey::Counter(counter.event_id), Row::Counter(counter));
    }

    pub fn put_reservation(&mut self, reservation: Reservation) {
        self.write(
            RowKey::Reservation(reservation.id),
            Row::Reservation(reservation),
        );
    }

    pub fn put_payment(&mut self, record: PaymentRecord) {
        self.write(
            RowKey::Payment(record.idempotency_key.clone()),
            Row::Payment(record),
        );
    }

    pub fn put_issue_sequence(&mut self, seq: u64) {
        self.write(RowKey::IssueSequence, Row::Sequence(seq));
    }

    /// Validate and apply.
    ///
    /// # Errors
    /// `TransactionConflict` if a row read by this transaction changed.
    pub fn commit(self) -> Result<CommitReceipt> {
        if self.writes.is_empty() {
            return Ok(CommitReceipt::default());
        }
        let capacity_updates = self
            .writes
            .iter()
            .filter_map(|(_, row)| match row {
                Row::Counter(c) => Some(c.update()),
                _ => None,
            })
            .collect();
        self.store.commit(&self.reads, self.writes)?;
        Ok(CommitReceipt { capacity_updates })
    }
}

/// Shared execution context: store, clock, retry budget, and the observer
/// told about every committed counter change.
pub struct TxnRunner {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    observer: Arc<dyn CapacityObserver>,
}

impl TxnRunner {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
        observer: Arc<dyn CapacityObserver>,
    ) -> Self {
        Self {
            store,
            clock,
            retry,
            observer,
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `f` through [`run_transaction`] and hand committed counter
    /// changes to the observer, after the commit and never inside it.
    ///
    /// # Errors
    /// Whatever `f` returns, or `RetriesExhausted` once the budget is spent.
    pub fn run<T>(&self, op: &'static str, f: impl FnMut(&mut Txn<'_>) -> Result<T>) -> Result<T> {
        let (value, receipt) = run_transaction(self.store.as_ref(), &self.retry, op, f)?;
        if !receipt.capacity_updates.is_empty() {
            debug!(op, updates = receipt.capacity_updates.len(), "committed");
            self.observer.on_commit(&receipt.capacity_updates);
        }
        Ok(value)
    }
}

/// Run `f` in a fresh transaction and commit, retrying on conflict with
/// jittered exponential backoff.
///
/// # Errors
/// Whatever `f` returns, or `RetriesExhausted` once `retry.max_attempts`
/// conflicting attempts have been made.
pub fn run_transaction<T>(
    store: &dyn Store,
    retry: &RetryConfig,
    op: &'static str,
    mut f: impl FnMut(&mut Txn<'_>) -> Result<T>,
) -> Result<(T, CommitReceipt)> {
    let mut attempt = 1;
    loop {
        let mut txn = Txn::begin(store);
        let outcome = f(&mut txn).and_then(|value| txn.commit().map(|receipt| (value, receipt)));
        match outcome {
            Err(err) if err.is_transient() => {
                if attempt >= retry.max_attempts {
                    warn!(op, attempts = attempt, "transaction retries exhausted");
                    return Err(SelfRegError::RetriesExhausted { attempts: attempt });
                }
                let backoff = retry.backoff_for(attempt);
                let jitter_ms = rand::thread_rng()
                    .gen_range(0..=u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX));
                warn!(op, attempt, backoff_ms = jitter_ms, "transaction conflict, retrying");
                thread::sleep(std::time::Duration::from_millis(jitter_ms));
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use selfreg_types::NoopObserver;

    use super::*;
    use crate::store::MemoryStore;

    fn runner(store: Arc<dyn Store>, attempts: u32) -> TxnRunner {
        TxnRunner::new(
            store,
            Arc::new(selfreg_types::SystemClock),
            RetryConfig {
                max_attempts: attempts,
                initial_backoff_ms: 0,
                max_backoff_ms: 0,
            },
            Arc::new(NoopObserver),
        )
    }

    #[test]
    fn read_your_writes() {
        let store = MemoryStore::new();
        let mut txn = Txn::begin(&store);
        let counter = CapacityCounter::new(EventId::new(), 4);
        txn.put_counter(counter);
        assert_eq!(txn.counter(counter.event_id).unwrap(), Some(counter));
        let receipt = txn.commit().unwrap();
        assert_eq!(receipt.capacity_updates, vec![counter.update()]);
    }

    #[test]
    fn aborted_txn_writes_nothing() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let runner = runner(Arc::clone(&store), 3);
        let id = EventId::new();
        let err = runner
            .run("test", |txn| {
                txn.put_counter(CapacityCounter::new(id, 1));
                Err::<(), _>(SelfRegError::CapacityExhausted(id))
            })
            .unwrap_err();
        assert!(matches!(err, SelfRegError::CapacityExhausted(_)));
        assert!(store.get(&RowKey::Counter(id)).unwrap().is_none());
    }

    #[test]
    fn conflicts_retry_then_exhaust() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let runner = runner(store, 3);
        let calls = AtomicU32::new(0);
        let err = runner
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SelfRegError::TransactionConflict)
            })
            .unwrap_err();
        assert!(matches!(err, SelfRegError::RetriesExhausted { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn conflict_clears_on_retry() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let runner = runner(Arc::clone(&store), 5);
        let id = EventId::new();
        let seeded = CapacityCounter::new(id, 2);
        let mut first = true;
        let held = runner
            .run("test", |txn| {
                let mut c = txn.counter(id)?.unwrap_or(seeded);
                if first {
                    // Someone else commits between our read and our commit.
                    first = false;
                    let mut other = Txn::begin(txn.store());
                    other.put_counter(seeded);
                    other.commit()?;
                }
                c.hold()?;
                txn.put_counter(c);
                Ok(c.held)
            })
            .unwrap();
        assert_eq!(held, 1);
    }
}
