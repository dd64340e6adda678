//! Inbound request surface.
//!
//! Transport-agnostic handlers for the routes the HTTP layer exposes. Each
//! takes raw path segments or body bytes, calls the [`Engine`], and returns a
//! [`Response`] whose [`ResponseCode`] lets a kiosk tell "sold out" from
//! "already used" from "invalid ticket".
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /reservations` | [`post_reservation`] |
//! | `POST /reservations/{id}/cancel` | [`post_cancel`] |
//! | `GET /events/{id}/capacity` | [`get_capacity`] |
//! | `POST /checkin` | [`post_checkin`] |
//! | `POST /webhooks/payment` | [`post_payment_webhook`] |

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use selfreg_types::{
    ApplyOutcome, EventId, HolderId, PaymentEvent, Reservation, ReservationId, Result,
    SelfRegError, VerifyReason,
};
use tracing::{debug, error};

use crate::Engine;

/// Outcome class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Success,
    /// No slot left. Expected, not a fault.
    CapacityExhausted,
    /// Credential already used.
    AlreadyRedeemed,
    NotFound,
    /// Bad or forged credential.
    InvalidCredential,
    /// The request is valid but the current state forbids it, or the store
    /// stayed contended past the retry budget.
    Conflict,
    /// Registration window is not open.
    Closed,
    BadRequest,
    Internal,
}

impl ResponseCode {
    /// Suggested HTTP status.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::Success => 200,
            Self::BadRequest => 400,
            Self::InvalidCredential => 401,
            Self::Closed => 403,
            Self::NotFound => 404,
            Self::CapacityExhausted | Self::AlreadyRedeemed | Self::Conflict => 409,
            Self::Internal => 500,
        }
    }
}

/// A handler result: code plus JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub code: ResponseCode,
    pub body: Value,
}

impl Response {
    fn success(body: Value) -> Self {
        Self {
            code: ResponseCode::Success,
            body,
        }
    }

    fn bad_request(reason: impl std::fmt::Display) -> Self {
        Self {
            code: ResponseCode::BadRequest,
            body: json!({ "error": reason.to_string() }),
        }
    }

    /// Map an engine error to its response.
    #[must_use]
    pub fn from_error(err: &SelfRegError) -> Self {
        let code = match err {
            SelfRegError::CapacityExhausted(_) => ResponseCode::CapacityExhausted,
            SelfRegError::AlreadyRedeemed(_) => ResponseCode::AlreadyRedeemed,
            SelfRegError::EventNotFound(_) | SelfRegError::ReservationNotFound(_) => {
                ResponseCode::NotFound
            }
            SelfRegError::InvalidCredential { .. } => ResponseCode::InvalidCredential,
            SelfRegError::RegistrationClosed(_) => ResponseCode::Closed,
            SelfRegError::InvalidEvent { .. } | SelfRegError::InvalidPaymentEvent { .. } => {
                ResponseCode::BadRequest
            }
            SelfRegError::EventAlreadyExists(_)
            | SelfRegError::CapacityDecrease { .. }
            | SelfRegError::InvalidTransition { .. }
            | SelfRegError::SlotAlreadyReleased(_)
            | SelfRegError::AlreadyCancelled(_)
            | SelfRegError::ReservationExpired(_)
            | SelfRegError::NotIssuable { .. }
            | SelfRegError::TransactionConflict
            | SelfRegError::RetriesExhausted { .. }
            | SelfRegError::SubscriberLimitReached { .. } => ResponseCode::Conflict,
            SelfRegError::LedgerInvariant { .. }
            | SelfRegError::Internal(_)
            | SelfRegError::Serialization(_)
            | SelfRegError::Configuration(_)
            | SelfRegError::Io(_) => ResponseCode::Internal,
        };
        if code == ResponseCode::Internal {
            error!(error = %err, "request failed");
        } else {
            debug!(error = %err, ?code, "request refused");
        }
        Self {
            code,
            body: json!({ "error": err.to_string() }),
        }
    }
}

fn respond<T>(result: Result<T>, body: impl FnOnce(T) -> Value) -> Response {
    match result {
        Ok(value) => Response::success(body(value)),
        Err(err) => Response::from_error(&err),
    }
}

fn reservation_body(r: &Reservation) -> Value {
    json!({
        "reservationId": r.id,
        "eventId": r.event_id,
        "state": r.state,
        "expiresAt": r.expires_at,
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReserveRequest {
    event_id: EventId,
    holder_id: HolderId,
}

#[derive(Debug, Deserialize)]
struct CheckinRequest {
    credential: String,
}

/// `POST /reservations` with `{eventId, holderId}`.
pub fn post_reservation(engine: &Engine, body: &[u8]) -> Response {
    let request: ReserveRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return Response::bad_request(err),
    };
    respond(
        engine.try_reserve(request.event_id, request.holder_id),
        |r| reservation_body(&r),
    )
}

/// `POST /reservations/{id}/cancel`.
pub fn post_cancel(engine: &Engine, reservation_id: &str) -> Response {
    let id: ReservationId = match reservation_id.parse() {
        Ok(id) => id,
        Err(err) => return Response::bad_request(err),
    };
    respond(engine.cancel(id), |r| reservation_body(&r))
}

/// `GET /events/{id}/capacity`.
pub fn get_capacity(engine: &Engine, event_id: &str) -> Response {
    let id: EventId = match event_id.parse() {
        Ok(id) => id,
        Err(err) => return Response::bad_request(err),
    };
    respond(engine.current_remaining(id), |remaining| {
        json!({ "eventId": id, "remaining": remaining })
    })
}

/// `POST /checkin` with `{credential}`.
///
/// Every refusal reason maps to a distinct door message: used tickets are
/// `AlreadyRedeemed`, unknown reservations `NotFound`, everything else
/// `InvalidCredential`.
pub fn post_checkin(engine: &Engine, body: &[u8]) -> Response {
    let request: CheckinRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return Response::bad_request(err),
    };
    let verification = match engine.verify_credential(&request.credential) {
        Ok(v) => v,
        Err(err) => return Response::from_error(&err),
    };
    let code = match verification.reason {
        VerifyReason::Admitted => ResponseCode::Success,
        VerifyReason::AlreadyRedeemed => ResponseCode::AlreadyRedeemed,
        VerifyReason::UnknownReservation => ResponseCode::NotFound,
        VerifyReason::InvalidCredential
        | VerifyReason::Superseded
        | VerifyReason::NotConfirmed(_) => ResponseCode::InvalidCredential,
    };
    Response {
        code,
        body: json!({
            "reservationId": verification.reservation_id,
            "valid": verification.valid,
            "reason": verification.reason.to_string(),
        }),
    }
}

/// Payment provider callback.
///
/// Acknowledges every decided outcome, duplicates and refunds owed
/// included, so the provider stops redelivering. Only malformed bodies and
/// store failures are non-success.
pub fn post_payment_webhook(engine: &Engine, body: &[u8]) -> Response {
    let event = match PaymentEvent::from_webhook_json(body) {
        Ok(event) => event,
        Err(err) => return Response::from_error(&err),
    };
    respond(engine.apply_payment(&event), |outcome| {
        json!({
            "received": true,
            "result": outcome_label(&outcome),
            "refundOwed": outcome.requires_refund(),
        })
    })
}

fn outcome_label(outcome: &ApplyOutcome) -> &'static str {
    match outcome {
        ApplyOutcome::Applied { .. } => "applied",
        ApplyOutcome::Duplicate { .. } => "duplicate",
        ApplyOutcome::UnknownReservation => "unknown_reservation",
        ApplyOutcome::PaymentAfterExpiry { .. } => "payment_after_expiry",
        ApplyOutcome::AlreadySettled { .. } => "already_settled",
        ApplyOutcome::Underpaid { .. } => "underpaid",
    }
}
