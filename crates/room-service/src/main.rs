//! Room Service
//!
//! Hosts short-lived rooms addressed by a generated key. Moderators create
//! rooms and replace settings over HTTP; members receive every change over a
//! WebSocket.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (plain or JSON lines)
//! 3. Initialize Prometheus metrics recorder
//! 4. Initialize actor system (`RoomControllerActorHandle`)
//! 5. Serve the room API, WebSocket endpoint, health probes and `/metrics`
//! 6. Wait for shutdown signal, then drain rooms within the shutdown bound

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use room_service::actors::{ActorMetrics, RoomControllerActorHandle};
use room_service::config::Config;
use room_service::http::{build_routes, AppState};
use room_service::observability::{health_router, init_metrics_recorder, HealthState};
use room_service::room::JsonObjectValidator;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration decides the log format, so load it before tracing and
    // report a failure once the subscriber exists.
    let config = Config::from_env();
    let json_logs = config.as_ref().is_ok_and(|c| c.json_logs);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_service=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Room Service");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        service_id = %config.service_id,
        bind_address = %config.bind_address,
        room_key_length = config.room_key_length,
        max_users_per_room = config.limits.max_users_per_room,
        max_connections_per_room = config.limits.max_connections_per_room,
        room_timeout_secs = config.limits.room_timeout.as_secs(),
        heartbeat_interval_ms = config.limits.heartbeat_interval.as_millis(),
        connection_timeout_ms = config.limits.connection_timeout.as_millis(),
        max_rooms_per_ip = config.max_rooms_per_ip,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let controller_handle = RoomControllerActorHandle::new(
        config.service_id.clone(),
        config.limits,
        Arc::new(JsonObjectValidator),
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    let app_state = Arc::new(AppState {
        controller: controller_handle.clone(),
        config: config.clone(),
    });

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = build_routes(app_state)
        .merge(health_router(Arc::clone(&health_state)))
        .merge(metrics_router);

    // Bind listener before marking ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind server");
            format!("Failed to bind server to {}: {e}", config.bind_address)
        })?;
    info!(addr = %config.bind_address, "Server bound successfully");

    health_state.set_ready();
    info!("Room Service ready");

    // Rooms are drained before the listener stops, so open WebSockets are
    // closed with a server-shutdown code rather than cut off.
    let shutdown_health = Arc::clone(&health_state);
    let shutdown_timeout = config.shutdown_timeout;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, draining rooms...");
            shutdown_health.set_draining();
            drain_rooms(&controller_handle, shutdown_timeout).await;
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    info!("Room Service shutdown complete");

    Ok(())
}

/// Shut down the room controller, cancelling it outright if rooms do not
/// drain within `timeout`.
async fn drain_rooms(controller: &RoomControllerActorHandle, timeout: Duration) {
    match tokio::time::timeout(timeout, controller.shutdown()).await {
        Ok(Ok(())) => info!("Room controller shut down cleanly"),
        Ok(Err(e)) => warn!(error = %e, "Room controller shutdown reported an error"),
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Room controller shutdown timed out, cancelling"
            );
            controller.cancel();
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the service
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
