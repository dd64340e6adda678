//! System-wide constants for the SelfReg engine.

/// Default lifetime of a PENDING reservation before it expires (seconds).
pub const DEFAULT_RESERVATION_TTL_SECS: u64 = 600;

/// Longest PENDING hold the configuration accepts (seven days).
pub const MAX_RESERVATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default period of the background expiry sweep (milliseconds).
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5_000;

/// Maximum reservations expired by a single sweep pass.
pub const DEFAULT_SWEEP_BATCH_LIMIT: usize = 1_000;

/// Default number of attempts for a conflicting transaction.
pub const DEFAULT_TXN_MAX_ATTEMPTS: u32 = 5;

/// Initial backoff between transaction retries (milliseconds).
pub const DEFAULT_TXN_INITIAL_BACKOFF_MS: u64 = 2;

/// Cap on the backoff between transaction retries (milliseconds).
pub const DEFAULT_TXN_MAX_BACKOFF_MS: u64 = 100;

/// Per-subscriber channel depth before a lagging kiosk is dropped.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Maximum concurrent display subscribers per event.
pub const DEFAULT_MAX_SUBSCRIBERS_PER_EVENT: usize = 1_024;

/// Upper bound on a provider idempotency key, in bytes.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Credential wire format version byte.
pub const CREDENTIAL_VERSION: u8 = 1;

/// Domain separation prefix for credential signatures.
pub const CREDENTIAL_DOMAIN: &[u8] = b"selfreg:credential:v1:";

/// Environment variable overriding the reservation TTL.
pub const ENV_RESERVATION_TTL_SECS: &str = "SELFREG_RESERVATION_TTL_SECS";

/// Environment variable overriding the sweep interval.
pub const ENV_SWEEP_INTERVAL_MS: &str = "SELFREG_SWEEP_INTERVAL_MS";

/// Environment variable carrying the hex credential signing seed.
pub const ENV_CREDENTIAL_KEY: &str = "SELFREG_CREDENTIAL_KEY";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "SelfReg";
