//! Message types for actor communication.
//!
//! Request/reply messages carry a `respond_to` oneshot sender; notifications
//! (pongs, closed connections, outbound events) are fire-and-forget.

use super::room::RoomActorHandle;
use super::transport::EventTransport;
use crate::errors::RoomError;
use crate::room::{RoomKey, RoomPhase};

use room_protocol::{CloseCode, RoomSnapshot, Settings};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Messages sent to the `RoomControllerActor`.
pub enum ControllerMessage {
    /// Return the room for `key`, creating it if no live room exists.
    GetOrCreateRoom {
        key: RoomKey,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RoomError>>,
    },

    /// Return the live room for `key`.
    GetRoom {
        key: RoomKey,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RoomError>>,
    },

    /// Get controller status.
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting rooms and cancel every room.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
}

/// Messages sent to a `RoomActor`.
pub enum RoomMessage {
    Initialize {
        moderator: String,
        respond_to: oneshot::Sender<Result<RoomSnapshot, RoomError>>,
    },

    Join {
        name: String,
        respond_to: oneshot::Sender<Result<RoomSnapshot, RoomError>>,
    },

    GetSettings {
        respond_to: oneshot::Sender<Result<RoomSnapshot, RoomError>>,
    },

    UpdateSettings {
        caller: String,
        settings: serde_json::Value,
        respond_to: oneshot::Sender<Result<Settings, RoomError>>,
    },

    /// Would `register` accept this name right now? Used before a socket upgrade.
    CheckMember {
        name: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Attach a socket for an admitted member, superseding any prior one.
    /// Replies with the new connection ID.
    Register {
        name: String,
        transport: Box<dyn EventTransport>,
        respond_to: oneshot::Sender<Result<String, RoomError>>,
    },

    /// A connection received a liveness acknowledgment.
    Pong { name: String, connection_id: String },

    /// A connection actor exited (client close, transport error).
    ConnectionClosed { name: String, connection_id: String },

    GetStatus {
        respond_to: oneshot::Sender<RoomStatus>,
    },
}

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Deliver a serialized event. The payload is shared by every recipient.
    Event {
        kind: &'static str,
        payload: Arc<str>,
    },

    /// Send a liveness probe.
    Probe,

    /// Close the socket with `code` and stop.
    Close { code: CloseCode },
}

// ---- Supporting Types ----

/// Controller status.
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    /// Number of rooms in the routing table.
    pub room_count: usize,
    /// Number of live connections across all rooms.
    pub connection_count: usize,
    /// Whether the controller has stopped accepting new rooms.
    pub is_draining: bool,
    /// Current controller mailbox depth.
    pub mailbox_depth: usize,
    /// Actor panics observed since startup.
    pub actor_panics: u64,
}

/// Room status, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct RoomStatus {
    pub room_key: String,
    pub phase: RoomPhase,
    pub member_count: usize,
    /// Names with a registered connection, sorted.
    pub online: Vec<String>,
    /// Unix timestamp (seconds) of room creation.
    pub created_at: i64,
}

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed the socket or the transport failed.
    ClientClosed,
    /// A newer connection for the same name replaced it.
    Superseded,
    /// No acknowledgment within the connection timeout.
    HeartbeatTimeout,
    /// The room could not enqueue an event (mailbox full or closed).
    SendFailed,
    /// The room expired.
    RoomExpired,
    /// The service is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Returns the reason as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::Superseded => "superseded",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::SendFailed => "send_failed",
            DisconnectReason::RoomExpired => "room_expired",
            DisconnectReason::Shutdown => "shutdown",
        }
    }

    /// Close code sent to the client, if the server initiates the close.
    #[must_use]
    pub const fn close_code(&self) -> Option<CloseCode> {
        match self {
            DisconnectReason::ClientClosed => None,
            DisconnectReason::Superseded => Some(CloseCode::Superseded),
            DisconnectReason::HeartbeatTimeout | DisconnectReason::SendFailed => {
                Some(CloseCode::HeartbeatTimeout)
            }
            DisconnectReason::RoomExpired => Some(CloseCode::RoomExpired),
            DisconnectReason::Shutdown => Some(CloseCode::ServerShutdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_labels() {
        assert_eq!(DisconnectReason::ClientClosed.as_str(), "client_closed");
        assert_eq!(DisconnectReason::Superseded.as_str(), "superseded");
        assert_eq!(
            DisconnectReason::HeartbeatTimeout.as_str(),
            "heartbeat_timeout"
        );
    }

    #[test]
    fn test_disconnect_reason_close_codes() {
        assert_eq!(DisconnectReason::ClientClosed.close_code(), None);
        assert_eq!(
            DisconnectReason::Superseded.close_code(),
            Some(CloseCode::Superseded)
        );
        assert_eq!(
            DisconnectReason::RoomExpired.close_code(),
            Some(CloseCode::RoomExpired)
        );
    }
}
