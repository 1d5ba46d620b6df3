//! Room Service Library
//!
//! Short-lived, key-addressed rooms with live membership and settings
//! fan-out:
//!
//! - A moderator creates a room and receives a short room key
//! - Participants join by key and display name
//! - The moderator replaces an opaque settings object
//! - Every change is pushed over WebSocket to all connected members
//! - Rooms expire after a period without accepted mutations
//!
//! # Architecture
//!
//! ```text
//! HTTP / WebSocket (axum)
//!        │
//!        ▼
//! RoomControllerActor (routing table: RoomKey -> RoomActor)
//! └── RoomActor (one per room; serialized mailbox)
//!     ├── RoomState (Uninitialized -> Active -> Expired)
//!     ├── connection registry (name -> ConnectionActor)
//!     ├── heartbeat ticker
//!     └── idle-expiry ticker
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Controller, room and connection actors
//! - [`room`] - Room key, state machine and settings validation
//! - [`http`] - Administrative routes and the WebSocket endpoint
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP mappings
//! - [`observability`] - Metrics and health probes

pub mod actors;
pub mod config;
pub mod errors;
pub mod http;
pub mod observability;
pub mod room;
