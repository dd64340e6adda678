//! # selfreg-engine
//!
//! The **SelfReg** registration and capacity allocation engine, assembled.
//!
//! ## Data flow
//!
//! ```text
//! POST /reservations ──▶ SlotLedger::try_reserve ──commit──▶ CapacityHub ──▶ kiosks
//!                                                   │
//! payment webhook ─────▶ PaymentReconciler::apply ──┤  (PENDING → CONFIRMED)
//!                                                   │
//! issue ───────────────▶ CredentialIssuer::issue    │
//! POST /checkin ───────▶ CredentialIssuer::verify ──┘  (CONFIRMED → REDEEMED)
//!
//! Sweeper (tokio interval) ──▶ sweep_expired ──▶ PENDING → EXPIRED, slot released
//! ```
//!
//! All paths share one [`Store`](selfreg_ledger::Store); the hub is the
//! runner's [`CapacityObserver`](selfreg_types::CapacityObserver).

pub mod engine;
pub mod surface;
pub mod sweeper;
pub mod telemetry;

pub use engine::Engine;
pub use surface::{Response, ResponseCode};
pub use sweeper::Sweeper;
pub use telemetry::LogFormat;
