//! # selfreg-ledger
//!
//! **Allocation Plane**: the transactional store, the Slot Ledger, and the
//! Reservation State Machine.
//!
//! ## Architecture
//!
//! Every mutation runs as one optimistic transaction over a [`Store`]:
//! 1. Read the rows it needs (event, counter, reservation), recording versions
//! 2. Decide the typed outcome in memory
//! 3. Commit the write set only if no read row moved, else retry
//! 4. Hand committed counter changes to the [`CapacityObserver`](selfreg_types::CapacityObserver)
//!
//! Capacity is a row, not a process-local variable, so the at-most-capacity
//! guarantee holds for any number of engine instances sharing one store.

pub mod slot_ledger;
pub mod state_machine;
pub mod store;
pub mod sweep;
pub mod txn;

pub use slot_ledger::SlotLedger;
pub use state_machine::ReservationMachine;
pub use store::{MemoryStore, Row, RowKey, Store, Versioned};
pub use sweep::{SweepReport, sweep_expired};
pub use txn::{CommitReceipt, Txn, TxnRunner, run_transaction};
