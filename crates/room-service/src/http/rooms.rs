//! Administrative room handlers.
//!
//! - `POST /api/rooms` - Create a room; the caller becomes moderator
//! - `POST /api/rooms/join` - Join a room by key
//! - `GET /api/rooms/settings?roomKey=` - Read settings, members and moderator
//! - `PUT /api/rooms/settings` - Replace settings (moderator only)
//!
//! Bodies and query strings use camelCase (`roomKey`). A missing or
//! malformed body is reported with the same message as a missing field.

use super::AppState;
use crate::errors::RoomError;
use crate::room::RoomKey;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use room_protocol::{RoomSnapshot, SettingsResponse};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Attempts at drawing an unused room key before giving up.
const MAX_KEY_ATTEMPTS: u32 = 5;

const NAME_REQUIRED: &str = "Name is required";
const NAME_AND_KEY_REQUIRED: &str = "Name and room key are required";
const KEY_REQUIRED: &str = "Room key is required";
const UPDATE_FIELDS_REQUIRED: &str = "Name, room key, and settings are required";

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomRequest {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub name: Option<String>,
    pub room_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsQuery {
    pub room_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub name: Option<String>,
    pub room_key: Option<String>,
    pub settings: Option<Value>,
}

/// Treat absent and empty strings alike.
fn present(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}

fn body_or_default<T: Default>(payload: Result<Json<T>, JsonRejection>) -> T {
    match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!(target: "room.http", error = %rejection, "Unreadable request body");
            T::default()
        }
    }
}

/// Handler for `POST /api/rooms`.
///
/// # Response
///
/// - 200 OK: snapshot of the new room (moderator is the only member)
/// - 400 Bad Request: missing or invalid name
/// - 503 Service Unavailable: shutting down
#[instrument(skip_all, name = "room.http.create")]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> Result<Json<RoomSnapshot>, RoomError> {
    let body = body_or_default(payload);
    let name =
        present(body.name).ok_or_else(|| RoomError::BadRequest(NAME_REQUIRED.to_string()))?;

    for attempt in 1..=MAX_KEY_ATTEMPTS {
        let key = RoomKey::generate(state.config.room_key_length)?;

        match state.controller.initialize(key, name.clone()).await {
            Err(RoomError::AlreadyInitialized) => {
                warn!(
                    target: "room.http",
                    attempt = attempt,
                    "Generated room key already in use, retrying"
                );
            }
            Ok(snapshot) => {
                info!(
                    target: "room.http",
                    room_key = %snapshot.room_key,
                    "Room created"
                );
                return Ok(Json(snapshot));
            }
            Err(e) => return Err(e),
        }
    }

    Err(RoomError::Internal(
        "exhausted attempts to allocate a unique room key".to_string(),
    ))
}

/// Handler for `POST /api/rooms/join`.
///
/// # Response
///
/// - 200 OK: room snapshot including the caller
/// - 400 Bad Request: missing fields or invalid name
/// - 404 Not Found: no such room, or it expired
/// - 409 Conflict: room is full
#[instrument(skip_all, name = "room.http.join")]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<JoinRoomRequest>, JsonRejection>,
) -> Result<Json<RoomSnapshot>, RoomError> {
    let body = body_or_default(payload);
    let (Some(name), Some(room_key)) = (present(body.name), present(body.room_key)) else {
        return Err(RoomError::BadRequest(NAME_AND_KEY_REQUIRED.to_string()));
    };

    state.controller.join(&room_key, name).await.map(Json)
}

/// Handler for `GET /api/rooms/settings?roomKey=`.
#[instrument(skip_all, name = "room.http.get_settings")]
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SettingsQuery>,
) -> Result<Json<RoomSnapshot>, RoomError> {
    let room_key =
        present(query.room_key).ok_or_else(|| RoomError::BadRequest(KEY_REQUIRED.to_string()))?;

    state.controller.get_settings(&room_key).await.map(Json)
}

/// Handler for `PUT /api/rooms/settings`.
///
/// # Response
///
/// - 200 OK: `{"settings": ...}` as stored
/// - 400 Bad Request: missing fields or settings rejected by validation
/// - 403 Forbidden: caller is not the moderator
/// - 404 Not Found: no such room, or it expired
#[instrument(skip_all, name = "room.http.update_settings")]
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateSettingsRequest>, JsonRejection>,
) -> Result<Json<SettingsResponse>, RoomError> {
    let body = body_or_default(payload);
    let settings = body.settings.filter(|value| !value.is_null());
    let (Some(name), Some(room_key), Some(settings)) =
        (present(body.name), present(body.room_key), settings)
    else {
        return Err(RoomError::BadRequest(UPDATE_FIELDS_REQUIRED.to_string()));
    };

    let settings = state
        .controller
        .update_settings(&room_key, name, settings)
        .await?;

    Ok(Json(SettingsResponse { settings }))
}
