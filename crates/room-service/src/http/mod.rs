//! HTTP and WebSocket surface.
//!
//! Defines the Axum router and application state.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /api/rooms` | create a room, caller becomes moderator |
//! | `POST /api/rooms/join` | admit a display name |
//! | `GET /api/rooms/settings?roomKey=` | read the room snapshot |
//! | `PUT /api/rooms/settings` | replace settings (moderator only) |
//! | `GET /ws?room=&name=` | upgrade to the real-time channel |

pub mod rooms;
pub mod ws;

use crate::actors::RoomControllerActorHandle;
use crate::config::Config;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Per-request timeout for the administrative routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Routing table for room actors.
    pub controller: RoomControllerActorHandle,

    /// Service configuration.
    pub config: Config,
}

/// Build the application routes.
///
/// Creates an Axum router with the room API and the WebSocket endpoint,
/// plus `TraceLayer` request logging and a 30 second request timeout.
/// Health and metrics routes are merged in by the binary.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/api/rooms", post(rooms::create_room))
        .route("/api/rooms/join", post(rooms::join_room))
        .route(
            "/api/rooms/settings",
            get(rooms::get_settings).put(rooms::update_settings),
        )
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    api_routes
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}
