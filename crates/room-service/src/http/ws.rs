//! WebSocket endpoint and the axum-backed `EventTransport`.
//!
//! `GET /ws?room=<key>&name=<display name>`
//!
//! Membership is checked before the upgrade so a refused client gets a
//! plain HTTP error (403/404/503) instead of an open-then-closed socket.
//! After the upgrade the socket is handed to the room as a
//! `WebSocketTransport`; the room's `ConnectionActor` owns it from then on.

use super::AppState;
use crate::actors::{EventTransport, Inbound, TransportError};
use crate::errors::RoomError;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use room_protocol::CloseCode;
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Query parameters for the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub room: Option<String>,
    pub name: Option<String>,
}

/// Handler for `GET /ws`.
#[instrument(skip_all, name = "room.ws.upgrade")]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response, RoomError> {
    let room = query.room.filter(|r| !r.is_empty());
    let name = query.name.filter(|n| !n.is_empty());
    let (Some(room), Some(name)) = (room, name) else {
        return Err(RoomError::BadRequest(
            "Name and room key are required".to_string(),
        ));
    };

    state.controller.check_member(&room, name.clone()).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        let transport = Box::new(WebSocketTransport::new(socket));
        match state.controller.connect(&room, name, transport).await {
            Ok(connection_id) => {
                debug!(
                    target: "room.ws",
                    room_key = %room,
                    connection_id = %connection_id,
                    "WebSocket registered"
                );
            }
            Err(e) => {
                // Membership changed between the check and the upgrade.
                debug!(
                    target: "room.ws",
                    room_key = %room,
                    error = %e,
                    "WebSocket registration refused after upgrade"
                );
            }
        }
    }))
}

/// `EventTransport` over an axum WebSocket.
///
/// Events go out as text frames, probes as pings. Pongs count as
/// acknowledgments; any other client frame is ignored.
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl EventTransport for WebSocketTransport {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn send_probe(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code: code.code(),
                reason: Cow::Borrowed(code.reason()),
            })))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn recv(&mut self) -> Inbound {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Pong(_))) => return Inbound::Ack,
                Some(Ok(Message::Close(_)) | Err(_)) | None => return Inbound::Closed,
                Some(Ok(_)) => {}
            }
        }
    }
}
