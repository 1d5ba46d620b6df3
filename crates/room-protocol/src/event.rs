//! Server-to-client events and administrative response bodies.

use serde::{Deserialize, Serialize};

/// Moderator-owned room settings.
///
/// Opaque to the service beyond schema validation; always replaced wholesale.
pub type Settings = serde_json::Map<String, serde_json::Value>;

/// Event pushed to every connected client of a room.
///
/// Serialized as an internally tagged JSON object, e.g.
/// `{"type":"presence_changed","name":"Bob","online":false}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full room state, sent once right after a socket is registered.
    Snapshot {
        room_key: String,
        moderator: String,
        members: Vec<String>,
        settings: Settings,
        /// Members that currently hold a live connection.
        online: Vec<String>,
    },
    /// Membership grew (a new name joined).
    MembershipChanged { members: Vec<String> },
    /// The moderator replaced the settings object.
    SettingsChanged { settings: Settings },
    /// A member's connection came up or went away. Membership is unchanged.
    PresenceChanged { name: String, online: bool },
    /// The room was idle too long and has been disposed.
    RoomExpired {},
}

impl ServerEvent {
    /// Short, bounded name used for logging and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Snapshot { .. } => "snapshot",
            ServerEvent::MembershipChanged { .. } => "membership_changed",
            ServerEvent::SettingsChanged { .. } => "settings_changed",
            ServerEvent::PresenceChanged { .. } => "presence_changed",
            ServerEvent::RoomExpired {} => "room_expired",
        }
    }
}

/// Room state as returned by `initialize`, `join` and `getSettings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_key: String,
    pub moderator: String,
    pub members: Vec<String>,
    pub settings: Settings,
}

/// Response body of `updateSettings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub settings: Settings,
}
