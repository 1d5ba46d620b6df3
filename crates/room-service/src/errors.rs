//! Room service error types.
//!
//! Every variant is terminal for the single operation that produced it and
//! is reported synchronously to the caller. Errors render as
//! `{"error": {"code", "message"}}` via the `IntoResponse` impl; internal
//! details are logged server-side and never returned to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Why a socket registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The display name has not been admitted to the room.
    NotMember,
    /// The registry is at `max_connections_per_room`.
    RegistryFull,
}

impl RejectReason {
    /// Returns the reason as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotMember => "not_member",
            RejectReason::RegistryFull => "registry_full",
        }
    }
}

/// Room service error type.
///
/// Maps to HTTP status codes:
/// - `AlreadyInitialized`, `RoomFull`: 409 Conflict
/// - `RoomNotFound`: 404 Not Found
/// - `InvalidName`, `InvalidSettings`, `BadRequest`: 400 Bad Request
/// - `Forbidden`, `ConnectionRejected(NotMember)`: 403 Forbidden
/// - `ConnectionRejected(RegistryFull)`, `Draining`: 503 Service Unavailable
/// - `Internal`: 500 Internal Server Error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// `initialize` on a room that is already active.
    #[error("Room already initialized")]
    AlreadyInitialized,

    /// No live room for the key (never created, or expired).
    #[error("Room not found")]
    RoomNotFound,

    /// Membership is at `max_users_per_room`.
    #[error("Room is full")]
    RoomFull,

    /// Display name is empty, whitespace-only, or too long.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Settings mutation attempted by someone other than the moderator.
    #[error("Only the moderator can change settings")]
    Forbidden,

    /// Settings failed schema validation.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// The connection registry refused the socket.
    #[error("Connection rejected: {}", .0.as_str())]
    ConnectionRejected(RejectReason),

    /// Malformed administrative request (missing fields).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The service is shutting down and accepts no new rooms.
    #[error("Service is draining")]
    Draining,

    /// Actor channel failure or other unexpected condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            RoomError::AlreadyInitialized => "ALREADY_INITIALIZED",
            RoomError::RoomNotFound => "ROOM_NOT_FOUND",
            RoomError::RoomFull => "ROOM_FULL",
            RoomError::InvalidName(_) => "INVALID_NAME",
            RoomError::Forbidden => "FORBIDDEN",
            RoomError::InvalidSettings(_) => "INVALID_SETTINGS",
            RoomError::ConnectionRejected(_) => "CONNECTION_REJECTED",
            RoomError::BadRequest(_) => "BAD_REQUEST",
            RoomError::Draining => "DRAINING",
            RoomError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            RoomError::AlreadyInitialized | RoomError::RoomFull => StatusCode::CONFLICT,
            RoomError::RoomNotFound => StatusCode::NOT_FOUND,
            RoomError::InvalidName(_)
            | RoomError::InvalidSettings(_)
            | RoomError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RoomError::Forbidden | RoomError::ConnectionRejected(RejectReason::NotMember) => {
                StatusCode::FORBIDDEN
            }
            RoomError::ConnectionRejected(RejectReason::RegistryFull) | RoomError::Draining => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RoomError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::Internal(_) => "An internal error occurred".to_string(),
            RoomError::ConnectionRejected(RejectReason::NotMember) => {
                "Join the room before connecting".to_string()
            }
            RoomError::ConnectionRejected(RejectReason::RegistryFull) => {
                "Room has too many active connections".to_string()
            }
            RoomError::Draining => "Server is shutting down, please try again".to_string(),
            RoomError::BadRequest(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        if let RoomError::Internal(detail) = &self {
            tracing::error!(target: "room.http", error = %detail, "Internal error");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}
