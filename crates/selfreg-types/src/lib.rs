//! # selfreg-types
//!
//! Shared types, errors, and configuration for the **SelfReg** registration
//! and capacity allocation engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`EventId`], [`ReservationId`], [`HolderId`], [`IdempotencyKey`]
//! - **Event model**: [`Event`], [`NewEvent`]
//! - **Reservation model**: [`Reservation`], [`ReservationState`], [`CredentialStamp`]
//! - **Capacity model**: [`CapacityCounter`], [`CapacityUpdate`]
//! - **Payment model**: [`PaymentEvent`], [`PaymentOutcome`], [`PaymentRecord`], [`ApplyOutcome`]
//! - **Credential model**: [`Credential`], [`Verification`], [`VerifyReason`]
//! - **Time**: [`Clock`], [`SystemClock`]
//! - **Configuration**: [`EngineConfig`], [`RetryConfig`], [`BroadcastConfig`]
//! - **Errors**: [`SelfRegError`] with `REG_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod capacity;
pub mod clock;
pub mod config;
pub mod constants;
pub mod credential;
pub mod error;
pub mod event;
pub mod ids;
pub mod payment;
pub mod reservation;

// Re-export all primary types at crate root for ergonomic imports:
//   use selfreg_types::{Reservation, ReservationState, PaymentEvent, ...};

pub use capacity::*;
pub use clock::*;
pub use config::*;
pub use credential::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use payment::*;
pub use reservation::*;

// Constants are accessed via `selfreg_types::constants::FOO`
// (not re-exported to avoid name collisions).
