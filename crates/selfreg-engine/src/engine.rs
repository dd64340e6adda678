//! The engine facade.

use std::{path::Path, sync::Arc};

use ed25519_dalek::VerifyingKey;
use selfreg_broadcast::{CapacityHub, CapacitySubscription};
use selfreg_ledger::{
    MemoryStore, ReservationMachine, SlotLedger, Store, SweepReport, TxnRunner, sweep_expired,
};
use selfreg_settlement::{CredentialIssuer, PaymentReconciler};
use selfreg_types::{
    ApplyOutcome, CapacityCounter, Clock, Credential, EngineConfig, Event, EventId, HolderId,
    NewEvent, PaymentEvent, PaymentRecord, Reservation, ReservationId, Result, SystemClock,
    Verification, constants,
};
use tracing::info;

/// One engine instance over one shared store.
///
/// Cheap to share behind an `Arc`; every operation is a short transaction
/// and may be called from any thread.
pub struct Engine {
    config: EngineConfig,
    ledger: SlotLedger,
    machine: ReservationMachine,
    reconciler: PaymentReconciler,
    issuer: CredentialIssuer,
    hub: CapacityHub,
}

impl Engine {
    /// Wire the engine over `store`, reading time from `clock`.
    ///
    /// # Errors
    /// `Configuration` if `config` does not validate.
    pub fn new(config: EngineConfig, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let hub = CapacityHub::new(config.broadcast);
        let runner = Arc::new(TxnRunner::new(
            store,
            clock,
            config.retry,
            Arc::new(hub.clone()),
        ));
        let ledger = SlotLedger::new(runner, config.reservation_ttl());
        let machine = ReservationMachine::new(ledger.clone());
        let reconciler = PaymentReconciler::new(machine.clone(), config.failed_payment_policy);
        let issuer = CredentialIssuer::new(machine.clone(), config.credential_seed()?);

        info!(
            engine = constants::ENGINE_NAME,
            version = constants::VERSION,
            ttl_secs = config.reservation_ttl_secs,
            policy = ?config.failed_payment_policy,
            "engine ready"
        );
        Ok(Self {
            config,
            ledger,
            machine,
            reconciler,
            issuer,
            hub,
        })
    }

    /// Engine over a fresh [`MemoryStore`] and the system clock.
    ///
    /// # Errors
    /// `Configuration` if `config` does not validate.
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    /// Load configuration from a JSON file (plus `SELFREG_*` overrides) and
    /// build an in-memory engine.
    ///
    /// # Errors
    /// `Io` or `Configuration`.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::in_memory(EngineConfig::load(path)?)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------

    /// # Errors
    /// `InvalidEvent` or `EventAlreadyExists`.
    pub fn publish_event(&self, new_event: &NewEvent) -> Result<Event> {
        self.ledger.publish_event(new_event)
    }

    /// # Errors
    /// `EventNotFound` or `CapacityDecrease`.
    pub fn increase_capacity(&self, event_id: EventId, new_capacity: u32) -> Result<CapacityCounter> {
        self.ledger.increase_capacity(event_id, new_capacity)
    }

    // -----------------------------------------------------------------
    // Reservations
    // -----------------------------------------------------------------

    /// # Errors
    /// `EventNotFound`, `RegistrationClosed` or `CapacityExhausted`.
    pub fn try_reserve(&self, event_id: EventId, holder_id: HolderId) -> Result<Reservation> {
        self.ledger.try_reserve(event_id, holder_id)
    }

    /// Ledger-level release. Rejects a second release of the same slot.
    ///
    /// # Errors
    /// `ReservationNotFound`, `SlotAlreadyReleased`, `AlreadyRedeemed` or
    /// `ReservationExpired`.
    pub fn release(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.ledger.release(reservation_id)
    }

    /// # Errors
    /// `ReservationNotFound`, `AlreadyRedeemed`, `AlreadyCancelled` or
    /// `ReservationExpired`.
    pub fn cancel(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.machine.cancel(reservation_id)
    }

    /// # Errors
    /// `EventNotFound`.
    pub fn current_remaining(&self, event_id: EventId) -> Result<u32> {
        self.ledger.current_remaining(event_id)
    }

    /// # Errors
    /// `ReservationNotFound`.
    pub fn get_reservation(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.machine.get(reservation_id)
    }

    // -----------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------

    /// # Errors
    /// Store failures only.
    pub fn apply_payment(&self, event: &PaymentEvent) -> Result<ApplyOutcome> {
        self.reconciler.apply(event)
    }

    /// # Errors
    /// Store failures only.
    pub fn pending_refunds(&self) -> Result<Vec<PaymentRecord>> {
        self.reconciler.pending_refunds()
    }

    /// # Errors
    /// `ReservationNotFound` or `NotIssuable`.
    pub fn issue_credential(&self, reservation_id: ReservationId) -> Result<Credential> {
        self.issuer.issue(reservation_id)
    }

    /// # Errors
    /// Store failures only; refusals are `Ok` with `valid: false`.
    pub fn verify_credential(&self, token: &str) -> Result<Verification> {
        self.issuer.verify(token)
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.issuer.verifying_key()
    }

    // -----------------------------------------------------------------
    // Broadcast & expiry
    // -----------------------------------------------------------------

    /// Subscribe a display to `event_id`. The first item is the current
    /// snapshot.
    ///
    /// # Errors
    /// `EventNotFound` or `SubscriberLimitReached`.
    pub fn subscribe(&self, event_id: EventId) -> Result<CapacitySubscription> {
        let counter = self.ledger.counter(event_id)?;
        self.hub.subscribe(counter.update())
    }

    /// One expiry pass over every event.
    ///
    /// # Errors
    /// Index scan failures.
    pub fn sweep_once(&self) -> Result<SweepReport> {
        sweep_expired(&self.machine, self.config.sweep_batch_limit)
    }
}
