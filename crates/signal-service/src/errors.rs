//! Signal service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Store,
//! crypto and internal failures are logged server-side and rendered to the
//! client with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Wire message for every failed join, whatever the cause.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid room or password";

/// Signal service error type.
///
/// Maps to HTTP status codes:
/// - Validation, BadRequest, InvalidCredentials, Protocol: 400 Bad Request
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
/// - RoomClosed, ServiceUnavailable: 503 Service Unavailable
/// - Store, Crypto, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Password did not match the stored hash.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The room actor shut down before handling the request.
    #[error("Room closed")]
    RoomClosed,

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            SignalError::Validation(_)
            | SignalError::BadRequest(_)
            | SignalError::InvalidCredentials
            | SignalError::Protocol(_) => 400,
            SignalError::NotFound(_) => 404,
            SignalError::Conflict(_) => 409,
            SignalError::RoomClosed | SignalError::ServiceUnavailable(_) => 503,
            SignalError::Store(_) | SignalError::Crypto(_) | SignalError::Internal(_) => 500,
        }
    }

    /// Collapse the join failure classes into one wire-identical error.
    ///
    /// Unknown handles and wrong passwords both become `InvalidCredentials`
    /// so a caller cannot learn whether a room exists.
    pub fn into_join_failure(self) -> Self {
        match self {
            SignalError::NotFound(_) | SignalError::InvalidCredentials => {
                SignalError::InvalidCredentials
            }
            other => other,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for SignalError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            SignalError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                reason.clone(),
            ),
            SignalError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            SignalError::InvalidCredentials => (
                StatusCode::BAD_REQUEST,
                "INVALID_CREDENTIALS",
                INVALID_CREDENTIALS_MESSAGE.to_string(),
            ),
            SignalError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            SignalError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            SignalError::Store(err) => {
                tracing::error!(target: "sig.database", error = %err, "Session store operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "An internal storage error occurred".to_string(),
                )
            }
            SignalError::Crypto(err) => {
                tracing::error!(target: "sig.crypto", error = %err, "Credential operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            SignalError::RoomClosed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ROOM_UNAVAILABLE",
                "Room is temporarily unavailable".to_string(),
            ),
            SignalError::Protocol(reason) => {
                (StatusCode::BAD_REQUEST, "PROTOCOL_ERROR", reason.clone())
            }
            SignalError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "sig.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            SignalError::Internal(err) => {
                tracing::error!(target: "sig.internal", error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert sqlx errors to SignalError.
///
/// Unique constraint violations become `Conflict`; everything else is a
/// store failure.
impl From<sqlx::Error> for SignalError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return SignalError::Conflict("Room token already in use".to_string());
            }
        }
        SignalError::Store(err.to_string())
    }
}
