//! Background expiry sweeper.
//!
//! Lazy expiry on read already keeps every answer correct; the sweeper only
//! returns abandoned slots to the pool so displays count down and back up
//! without waiting for someone to touch the reservation.
//!
//! ## Architecture
//!
//! 1. A tokio interval ticks every `sweep_interval_ms`.
//! 2. Each tick runs [`Engine::sweep_once`] on the blocking pool, since
//!    transaction retries back off with `thread::sleep`.
//! 3. A `watch` channel carries the shutdown signal; the loop exits between
//!    passes, never in the middle of one.

use std::{sync::Arc, time::Duration};

use selfreg_types::{Result, SelfRegError};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::Engine;

/// Handle to a running sweep loop.
pub struct Sweeper {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Sweeper {
    /// Start sweeping `engine` every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(engine: Arc<Engine>, interval: Duration) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis(), "expiry sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = run_pass(Arc::clone(&engine)).await {
                            error!(error = %err, "expiry sweep failed");
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("expiry sweeper stopped");
        });
        Self { handle, shutdown }
    }

    /// Start with the engine's configured interval.
    #[must_use]
    pub fn spawn_configured(engine: Arc<Engine>) -> Self {
        let interval = engine.config().sweep_interval();
        Self::spawn(engine, interval)
    }

    /// Signal the loop and wait for it to finish its current pass.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!(error = %err, "expiry sweeper task ended abnormally");
        }
    }
}

async fn run_pass(engine: Arc<Engine>) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || engine.sweep_once())
        .await
        .map_err(|e| SelfRegError::Internal(format!("sweep task failed: {e}")))??;
    debug!(
        pending = report.pending,
        examined = report.examined,
        expired = report.expired,
        errors = report.errors,
        "sweep pass"
    );
    Ok(())
}
