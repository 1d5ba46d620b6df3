//! Shared harness for room-service integration tests.
//!
//! `TestRoomServer` serves the full router on an ephemeral port (for
//! WebSocket clients) and also answers HTTP calls in-process through
//! `tower::ServiceExt::oneshot`. Both paths share one room controller.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use room_protocol::ServerEvent;
use room_service::actors::{ActorMetrics, RoomControllerActorHandle};
use room_service::config::{Config, RoomLimits};
use room_service::http::{build_routes, AppState};
use room_service::room::JsonObjectValidator;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::util::ServiceExt;

/// How long a test waits for an expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestRoomServer {
    addr: SocketAddr,
    app: Router,
    controller: RoomControllerActorHandle,
    server: JoinHandle<()>,
}

impl TestRoomServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(RoomLimits::default()).await
    }

    pub async fn spawn_with(limits: RoomLimits) -> Self {
        let mut config = Config::from_vars(&HashMap::new()).unwrap();
        config.service_id = "room-test".to_string();
        config.limits = limits;

        let controller = RoomControllerActorHandle::new(
            config.service_id.clone(),
            limits,
            Arc::new(JsonObjectValidator),
            ActorMetrics::new(),
        );

        let app = build_routes(Arc::new(AppState {
            controller: controller.clone(),
            config,
        }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = app.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, served).await.unwrap();
        });

        Self {
            addr,
            app,
            controller,
            server,
        }
    }

    /// Base URL for `room_client::RoomClient::new`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn controller(&self) -> &RoomControllerActorHandle {
        &self.controller
    }

    /// Send one request through the router and decode the JSON response.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Create a room moderated by `name` and return its key.
    pub async fn create_room(&self, name: &str) -> String {
        let (status, body) = self
            .request(Method::POST, "/api/rooms", Some(json!({ "name": name })))
            .await;
        assert_eq!(status, StatusCode::OK, "create failed: {body}");
        body["roomKey"].as_str().unwrap().to_string()
    }

    pub async fn join(&self, room_key: &str, name: &str) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            "/api/rooms/join",
            Some(json!({ "name": name, "roomKey": room_key })),
        )
        .await
    }

    pub async fn update_settings(
        &self,
        room_key: &str,
        name: &str,
        settings: Value,
    ) -> (StatusCode, Value) {
        self.request(
            Method::PUT,
            "/api/rooms/settings",
            Some(json!({ "name": name, "roomKey": room_key, "settings": settings })),
        )
        .await
    }
}

impl Drop for TestRoomServer {
    fn drop(&mut self) {
        self.controller.cancel();
        self.server.abort();
    }
}

/// Wait for the next event or fail the test.
pub async fn next_event(events: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Assert the error envelope `{"error": {"code", "message"}}`.
pub fn assert_error(body: &Value, code: &str, message: &str) {
    assert_eq!(body["error"]["code"], code, "unexpected body: {body}");
    assert_eq!(body["error"]["message"], message, "unexpected body: {body}");
}
