//! Actor model implementation for the room service.
//!
//! ```text
//! RoomControllerActor (singleton per service instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per room key)
//!         ├── owns RoomState (members, moderator, settings)
//!         ├── owns the connection registry
//!         └── supervises N ConnectionActors
//!             └── ConnectionActor (one per WebSocket)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One actor per room**: Mutations on a room are serialized by its mailbox;
//!   rooms share no mutable state and run concurrently
//! - **One actor per socket**: The room enqueues with `try_send` and never waits
//!   on a slow client
//! - **CancellationToken propagation**: Parent actors pass child tokens for graceful shutdown
//! - **Mailbox monitoring**: Depth thresholds with metrics (Room: 100/500, Connection: 50/200)
//!
//! # Modules
//!
//! - [`controller`] - `RoomControllerActor` routing table keyed by room key
//! - [`room`] - `RoomActor` per room, owns state, registry, and timers
//! - [`connection`] - `ConnectionActor` per WebSocket
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics
//! - [`transport`] - `EventTransport` seam between connection actors and sockets

pub mod connection;
pub mod controller;
pub mod messages;
pub mod metrics;
pub mod room;
pub mod transport;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use controller::{RoomControllerActor, RoomControllerActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use room::{RoomActor, RoomActorHandle};
pub use transport::{EventTransport, Inbound, TransportError};
