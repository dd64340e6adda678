//! Engine configuration.
//!
//! Loaded from JSON with every field optional (defaults come from
//! [`constants`]), then overridden from the environment, then validated.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, SelfRegError, constants};

/// What a `failed` settlement does to a PENDING reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedPaymentPolicy {
    /// Leave it PENDING; the attendee may retry until the hold expires.
    #[default]
    KeepPending,
    /// Cancel immediately and release the slot.
    Cancel,
}

/// Backoff for transactions that lose an optimistic commit race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_TXN_MAX_ATTEMPTS,
            initial_backoff_ms: constants::DEFAULT_TXN_INITIAL_BACKOFF_MS,
            max_backoff_ms: constants::DEFAULT_TXN_MAX_BACKOFF_MS,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), doubling and capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Fan-out limits for the capacity broadcast hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Queued updates per subscriber before it is dropped as lagging.
    pub subscriber_buffer: usize,
    pub max_subscribers_per_event: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: constants::DEFAULT_SUBSCRIBER_BUFFER,
            max_subscribers_per_event: constants::DEFAULT_MAX_SUBSCRIBERS_PER_EVENT,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lifetime of a PENDING hold.
    pub reservation_ttl_secs: u64,
    /// Period of the background expiry sweep.
    pub sweep_interval_ms: u64,
    /// Maximum expirations per sweep pass.
    pub sweep_batch_limit: usize,
    pub retry: RetryConfig,
    pub failed_payment_policy: FailedPaymentPolicy,
    pub broadcast: BroadcastConfig,
    /// Hex ed25519 seed for credential signing. `None` means ephemeral.
    pub credential_key_hex: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: constants::DEFAULT_RESERVATION_TTL_SECS,
            sweep_interval_ms: constants::DEFAULT_SWEEP_INTERVAL_MS,
            sweep_batch_limit: constants::DEFAULT_SWEEP_BATCH_LIMIT,
            retry: RetryConfig::default(),
            failed_payment_policy: FailedPaymentPolicy::default(),
            broadcast: BroadcastConfig::default(),
            credential_key_hex: None,
        }
    }
}

impl EngineConfig {
    /// Parse from a JSON document. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns `Configuration` if the document is not valid JSON for this shape.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SelfRegError::Configuration(e.to_string()))
    }

    /// Read a JSON file, apply environment overrides, and validate.
    ///
    /// # Errors
    /// `Io` if the file cannot be read, `Configuration` if it does not parse
    /// or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_json_str(&text)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SELFREG_*` overrides through `lookup`.
    ///
    /// # Errors
    /// Returns `Configuration` if a numeric override does not parse.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup(constants::ENV_RESERVATION_TTL_SECS) {
            self.reservation_ttl_secs = parse_env(constants::ENV_RESERVATION_TTL_SECS, &v)?;
        }
        if let Some(v) = lookup(constants::ENV_SWEEP_INTERVAL_MS) {
            self.sweep_interval_ms = parse_env(constants::ENV_SWEEP_INTERVAL_MS, &v)?;
        }
        if let Some(v) = lookup(constants::ENV_CREDENTIAL_KEY) {
            self.credential_key_hex = Some(v);
        }
        Ok(())
    }

    /// Check ranges and key material.
    ///
    /// # Errors
    /// Returns `Configuration` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.reservation_ttl_secs == 0 {
            return Err(config_err("reservation_ttl_secs must be > 0"));
        }
        if self.reservation_ttl_secs > constants::MAX_RESERVATION_TTL_SECS {
            return Err(config_err("reservation_ttl_secs exceeds the seven day maximum"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(config_err("sweep_interval_ms must be > 0"));
        }
        if self.sweep_batch_limit == 0 {
            return Err(config_err("sweep_batch_limit must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_err("retry.max_attempts must be > 0"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(config_err(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms",
            ));
        }
        if self.broadcast.subscriber_buffer == 0 {
            return Err(config_err("broadcast.subscriber_buffer must be > 0"));
        }
        if self.broadcast.max_subscribers_per_event == 0 {
            return Err(config_err("broadcast.max_subscribers_per_event must be > 0"));
        }
        self.credential_seed()?;
        Ok(())
    }

    /// Decoded credential signing seed, if configured.
    ///
    /// # Errors
    /// Returns `Configuration` if the hex is malformed or not 32 bytes.
    pub fn credential_seed(&self) -> Result<Option<[u8; 32]>> {
        let Some(hex_seed) = self.credential_key_hex.as_deref() else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_seed.trim())
            .map_err(|e| SelfRegError::Configuration(format!("credential key: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            SelfRegError::Configuration(format!(
                "credential key must be 32 bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Some(seed))
    }

    /// PENDING hold lifetime.
    #[must_use]
    pub fn reservation_ttl(&self) -> chrono::Duration {
        let secs = self.reservation_ttl_secs.min(constants::MAX_RESERVATION_TTL_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    /// Sweep period.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SelfRegError::Configuration(format!("{key}={value:?} is not a number")))
}

fn config_err(msg: &str) -> SelfRegError {
    SelfRegError::Configuration(msg.to_string())
}
