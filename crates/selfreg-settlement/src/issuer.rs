//! Credential Issuer: signed, single-use check-in tokens.
//!
//! ## Issuance
//!
//! Legal only from CONFIRMED. Each issuance takes the next value of the
//! global issuance sequence and stamps it on the reservation; the token
//! binds reservation, event, sequence and issue time under an ed25519
//! signature with domain separation (`selfreg:credential:v1:`). Issuing again
//! supersedes every earlier token for that reservation.
//!
//! ## Verification
//!
//! ```text
//! decode + signature  ── fail ──▶ InvalidCredential   (security log)
//!        │
//! load reservation    ── none ──▶ UnknownReservation
//!        │
//! stamp.seq == token.seq ─ no ──▶ Superseded
//!        │
//! state CONFIRMED ─ REDEEMED ───▶ AlreadyRedeemed
//!        │        └ other ──────▶ NotConfirmed(state)
//!        ▼
//! CONFIRMED → REDEEMED (same transaction) ──▶ Admitted
//! ```
//!
//! Authenticity never needs the store. Verification and redemption are one
//! transaction, so two scans racing on one token admit exactly one person.

use chrono::DateTime;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use selfreg_ledger::ReservationMachine;
use selfreg_types::{
    Credential, CredentialStamp, ReservationId, ReservationState, Result, SelfRegError,
    Verification, VerifyReason, token_fingerprint,
};
use tracing::{info, warn};

/// Mints and redeems check-in credentials.
#[derive(Clone)]
pub struct CredentialIssuer {
    machine: ReservationMachine,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl CredentialIssuer {
    /// Build an issuer from a 32-byte seed, or a fresh ephemeral key when no
    /// seed is configured. Tokens signed by an ephemeral key stop verifying
    /// when the process restarts.
    #[must_use]
    pub fn new(machine: ReservationMachine, seed: Option<[u8; 32]>) -> Self {
        let signing_key = if let Some(seed) = seed {
            SigningKey::from_bytes(&seed)
        } else {
            warn!("no credential key configured, using an ephemeral signing key");
            SigningKey::generate(&mut rand::rngs::OsRng)
        };
        let verifying_key = signing_key.verifying_key();
        Self {
            machine,
            signing_key,
            verifying_key,
        }
    }

    /// Public half of the signing key, for offline verifiers.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }

    /// Issue a credential for a CONFIRMED reservation.
    ///
    /// # Errors
    /// - `ReservationNotFound`
    /// - `NotIssuable` unless the reservation is CONFIRMED
    pub fn issue(&self, reservation_id: ReservationId) -> Result<Credential> {
        let runner = self.machine.ledger().runner();
        let now = runner.now();
        let issued_at = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);

        let (event_id, issued_seq) = runner.run("issue_credential", |txn| {
            let mut reservation = self.machine.load_in(txn, reservation_id, now)?;
            if reservation.state != ReservationState::Confirmed {
                return Err(SelfRegError::NotIssuable {
                    id: reservation_id,
                    state: reservation.state,
                });
            }
            let seq = txn.issue_sequence()? + 1;
            txn.put_issue_sequence(seq);
            reservation.credential = Some(CredentialStamp {
                issued_seq: seq,
                issued_at,
                redeemed_at: None,
            });
            reservation.updated_at = now;
            let event_id = reservation.event_id;
            txn.put_reservation(reservation);
            Ok((event_id, seq))
        })?;

        let payload = Credential::signing_payload(reservation_id, event_id, issued_seq, issued_at);
        let credential = Credential {
            reservation_id,
            event_id,
            issued_seq,
            issued_at,
            signature: self.signing_key.sign(&payload).to_bytes(),
        };
        info!(reservation = %reservation_id, seq = issued_seq, "credential issued");
        Ok(credential)
    }

    /// Check a scanned token and, if admissible, redeem its reservation.
    ///
    /// Refusals are `Ok` with `valid: false`.
    ///
    /// # Errors
    /// Store failures and `RetriesExhausted` only.
    pub fn verify(&self, token: &str) -> Result<Verification> {
        let credential = match self.authenticate(token) {
            Ok(credential) => credential,
            Err(err) => {
                warn!(
                    target: "security",
                    fingerprint = %token_fingerprint(token),
                    error = %err,
                    "credential rejected"
                );
                return Ok(Verification::refused(
                    None,
                    VerifyReason::InvalidCredential,
                ));
            }
        };

        let id = credential.reservation_id;
        let runner = self.machine.ledger().runner();
        let now = runner.now();
        let verification = runner.run("verify_credential", |txn| {
            let Some(mut reservation) = txn.reservation(id)? else {
                return Ok(Verification::refused(
                    Some(id),
                    VerifyReason::UnknownReservation,
                ));
            };
            if reservation.event_id != credential.event_id {
                return Ok(Verification::refused(
                    Some(id),
                    VerifyReason::InvalidCredential,
                ));
            }
            self.machine.expire_in(txn, &mut reservation, now)?;

            let live_seq = reservation.credential.map(|stamp| stamp.issued_seq);
            if live_seq != Some(credential.issued_seq) {
                return Ok(Verification::refused(Some(id), VerifyReason::Superseded));
            }
            match reservation.state {
                ReservationState::Confirmed => {
                    self.machine.redeem_in(txn, &mut reservation, now)?;
                    Ok(Verification::admitted(id))
                }
                ReservationState::Redeemed => Ok(Verification::refused(
                    Some(id),
                    VerifyReason::AlreadyRedeemed,
                )),
                state => Ok(Verification::refused(
                    Some(id),
                    VerifyReason::NotConfirmed(state),
                )),
            }
        })?;

        match verification.reason {
            VerifyReason::Admitted => info!(reservation = %id, "credential redeemed"),
            VerifyReason::InvalidCredential => warn!(
                target: "security",
                fingerprint = %token_fingerprint(token),
                reservation = %id,
                "credential event mismatch"
            ),
            reason => warn!(reservation = %id, %reason, "credential refused"),
        }
        Ok(verification)
    }

    fn authenticate(&self, token: &str) -> Result<Credential> {
        let credential = Credential::decode(token)?;
        let signature = Signature::from_bytes(&credential.signature);
        self.verifying_key
            .verify_strict(&credential.payload(), &signature)
            .map_err(|_| SelfRegError::InvalidCredential {
                reason: "signature does not verify".to_string(),
            })?;
        Ok(credential)
    }
}
