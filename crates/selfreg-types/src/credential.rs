//! Check-in credential wire format.
//!
//! A credential is a URL-safe base64 token (no padding) over a fixed binary
//! layout, short enough for a QR code:
//!
//! ```text
//! offset  len  field
//! 0       1    version (= 1)
//! 1       16   reservation id
//! 17      16   event id
//! 33      8    issuance sequence, big-endian
//! 41      8    issued-at, unix millis, big-endian
//! 49      64   ed25519 signature over the signing payload
//! ```
//!
//! Authenticity is checked from the token alone; the store is consulted only
//! for the reservation's state.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{EventId, ReservationId, ReservationState, Result, SelfRegError, constants};

/// Total decoded length of a version-1 token.
pub const CREDENTIAL_LEN: usize = 1 + 16 + 16 + 8 + 8 + 64;

const SIGNED_LEN: usize = CREDENTIAL_LEN - 64;

/// A decoded check-in credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub reservation_id: ReservationId,
    pub event_id: EventId,
    pub issued_seq: u64,
    pub issued_at: DateTime<Utc>,
    pub signature: [u8; 64],
}

impl Credential {
    /// Canonical signing payload.
    ///
    /// Format: `"selfreg:credential:v1:" || version || reservation || event || seq || issued_at_ms`
    #[must_use]
    pub fn signing_payload(
        reservation_id: ReservationId,
        event_id: EventId,
        issued_seq: u64,
        issued_at: DateTime<Utc>,
    ) -> Vec<u8> {
        let mut payload = Vec::with_capacity(constants::CREDENTIAL_DOMAIN.len() + SIGNED_LEN);
        payload.extend_from_slice(constants::CREDENTIAL_DOMAIN);
        payload.extend_from_slice(&Self::header(reservation_id, event_id, issued_seq, issued_at));
        payload
    }

    /// Signing payload of this credential.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        Self::signing_payload(
            self.reservation_id,
            self.event_id,
            self.issued_seq,
            self.issued_at,
        )
    }

    fn header(
        reservation_id: ReservationId,
        event_id: EventId,
        issued_seq: u64,
        issued_at: DateTime<Utc>,
    ) -> [u8; SIGNED_LEN] {
        let mut out = [0u8; SIGNED_LEN];
        out[0] = constants::CREDENTIAL_VERSION;
        out[1..17].copy_from_slice(reservation_id.0.as_bytes());
        out[17..33].copy_from_slice(event_id.0.as_bytes());
        out[33..41].copy_from_slice(&issued_seq.to_be_bytes());
        out[41..49].copy_from_slice(&issued_at.timestamp_millis().to_be_bytes());
        out
    }

    /// Encode to the printable token.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(CREDENTIAL_LEN);
        raw.extend_from_slice(&Self::header(
            self.reservation_id,
            self.event_id,
            self.issued_seq,
            self.issued_at,
        ));
        raw.extend_from_slice(&self.signature);
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decode a scanned token. Does **not** check the signature.
    ///
    /// # Errors
    /// Returns `InvalidCredential` for bad base64, wrong length, an unknown
    /// version, or an unrepresentable timestamp.
    pub fn decode(token: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| invalid(format!("not base64url: {e}")))?;
        if raw.len() != CREDENTIAL_LEN {
            return Err(invalid(format!(
                "expected {CREDENTIAL_LEN} bytes, got {}",
                raw.len()
            )));
        }
        if raw[0] != constants::CREDENTIAL_VERSION {
            return Err(invalid(format!("unsupported version {}", raw[0])));
        }

        let mut reservation = [0u8; 16];
        reservation.copy_from_slice(&raw[1..17]);
        let mut event = [0u8; 16];
        event.copy_from_slice(&raw[17..33]);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&raw[33..41]);
        let mut millis = [0u8; 8];
        millis.copy_from_slice(&raw[41..49]);
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&raw[49..]);

        let issued_at = DateTime::from_timestamp_millis(i64::from_be_bytes(millis))
            .ok_or_else(|| invalid("issued-at out of range".to_string()))?;

        Ok(Self {
            reservation_id: ReservationId::from_bytes(reservation),
            event_id: EventId::from_bytes(event),
            issued_seq: u64::from_be_bytes(seq),
            issued_at,
            signature,
        })
    }
}

fn invalid(reason: String) -> SelfRegError {
    SelfRegError::InvalidCredential { reason }
}

/// Short SHA-256 fingerprint of a raw token, safe to write to logs.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}

/// Why a scan was accepted or refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "code", content = "state")]
pub enum VerifyReason {
    /// Signature valid, reservation was CONFIRMED and is now REDEEMED.
    Admitted,
    /// The reservation was already redeemed. Possible double-scan or copy.
    AlreadyRedeemed,
    /// Bad format or signature. Security event.
    InvalidCredential,
    /// A newer credential was issued for this reservation.
    Superseded,
    /// The signed reservation no longer exists.
    UnknownReservation,
    /// The reservation is not admissible in its current state.
    NotConfirmed(ReservationState),
}

impl std::fmt::Display for VerifyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admitted => write!(f, "ADMITTED"),
            Self::AlreadyRedeemed => write!(f, "ALREADY_REDEEMED"),
            Self::InvalidCredential => write!(f, "INVALID_CREDENTIAL"),
            Self::Superseded => write!(f, "SUPERSEDED"),
            Self::UnknownReservation => write!(f, "UNKNOWN_RESERVATION"),
            Self::NotConfirmed(state) => write!(f, "NOT_CONFIRMED({state})"),
        }
    }
}

/// Result of `verify(credential)`: `{reservationId, valid, reason}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    /// Present whenever the token decoded, even if it was refused.
    pub reservation_id: Option<ReservationId>,
    pub valid: bool,
    pub reason: VerifyReason,
}

impl Verification {
    #[must_use]
    pub fn admitted(reservation_id: ReservationId) -> Self {
        Self {
            reservation_id: Some(reservation_id),
            valid: true,
            reason: VerifyReason::Admitted,
        }
    }

    #[must_use]
    pub fn refused(reservation_id: Option<ReservationId>, reason: VerifyReason) -> Self {
        Self {
            reservation_id,
            valid: false,
            reason,
        }
    }
}
