//! Wire protocol for key-addressed rooms.
//!
//! This crate holds the types that cross the process boundary between the
//! room service and its clients:
//!
//! - [`ServerEvent`] - JSON text frames pushed over the real-time socket
//! - [`RoomSnapshot`] - response body of the administrative calls
//! - [`CloseCode`] - application close codes carried in WebSocket close frames
//!
//! The only client-to-server traffic on the socket is the transport-level
//! pong answering a server ping, so there is no client event type.

#![warn(clippy::pedantic)]

pub mod close;
pub mod event;

pub use close::CloseCode;
pub use event::{RoomSnapshot, ServerEvent, Settings, SettingsResponse};
