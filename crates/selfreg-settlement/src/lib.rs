//! # selfreg-settlement
//!
//! **Settlement Plane**: payment reconciliation and check-in credentials.
//!
//! ## Architecture
//!
//! The Settlement Plane sits on top of the Allocation Plane and never touches
//! capacity directly:
//! 1. [`PaymentReconciler`] records each provider event once, keyed by its
//!    idempotency key, in the same transaction as the reservation transition
//! 2. Settlements that cannot be honoured are persisted as refunds owed
//! 3. [`CredentialIssuer`] signs a token for a CONFIRMED reservation
//! 4. Verification at the door checks the signature from the token alone,
//!    then redeems the reservation atomically

pub mod issuer;
pub mod reconciliation;

pub use issuer::CredentialIssuer;
pub use reconciliation::PaymentReconciler;
