//! Room Client
//!
//! Reconnecting WebSocket client for the room service's real-time channel.
//!
//! A [`RoomClient`] connects as one member of one room, forwards every
//! [`ServerEvent`](room_protocol::ServerEvent) to the caller, and on an
//! unexpected disconnect retries with exponential backoff
//! ([`ReconnectPolicy`]). No event log is replayed on reconnect; the
//! `Snapshot` pushed after every registration resynchronizes the caller.
//!
//! The session ends for good when the room expires, when another connection
//! for the same name supersedes this one, when the server refuses the
//! upgrade, or after too many consecutive failed attempts.

pub mod error;
pub mod policy;
pub mod runner;
mod session;

pub use error::ClientError;
pub use policy::ReconnectPolicy;
pub use runner::{RoomClient, SessionEnd};
