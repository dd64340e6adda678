//! # selfreg-broadcast
//!
//! **Display Plane**: fans committed capacity changes out to kiosk displays.
//!
//! ## Guarantees
//!
//! - Best-effort, at-least-once per subscriber. Publishing never blocks the
//!   committing thread; a subscriber whose queue is full is dropped and must
//!   resubscribe.
//! - Every update carries the event's counter sequence. Subscribers keep the
//!   highest sequence seen and discard the rest ([`SequenceTracker`]).
//! - A new subscriber receives the current snapshot before any incremental
//!   update.

pub mod hub;
pub mod subscription;

pub use hub::CapacityHub;
pub use subscription::{CapacitySubscription, DropReason, SequenceTracker};
