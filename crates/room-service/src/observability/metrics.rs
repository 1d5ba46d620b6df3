//! Prometheus metrics for the room service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 3 values (controller, room, connection)
//! - `operation`: 5 values (initialize, join, get_settings, update_settings, register)
//! - `status`: "success" or one of the `RoomError` codes
//! - `event`: 5 values (`ServerEvent` kinds)
//! - `reason`: 6 values (`DisconnectReason`)
//!
//! Room keys and display names are never used as labels.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `room_rooms_active` | Gauge | none |
//! | `room_connections_active` | Gauge | none |
//! | `room_operations_total` | Counter | `operation`, `status` |
//! | `room_operation_duration_seconds` | Histogram | `operation` |
//! | `room_broadcast_events_total` | Counter | `event` |
//! | `room_broadcast_failures_total` | Counter | none |
//! | `room_connections_closed_total` | Counter | `reason` |
//! | `room_expired_total` | Counter | none |
//! | `room_actor_mailbox_depth` | Gauge | `actor_type` |
//! | `room_actor_panics_total` | Counter | `actor_type` |

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if a global recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // In-memory actor round trips: sub-millisecond to a few hundred ms.
        .set_buckets_for_metric(
            Matcher::Full("room_operation_duration_seconds".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set operation duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Metric: `room_rooms_active`
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_rooms_active").set(count as f64);
}

/// Metric: `room_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_connections_active").set(count as f64);
}

/// Record one room operation and its latency.
///
/// Metrics: `room_operations_total{operation,status}`,
/// `room_operation_duration_seconds{operation}`
pub fn record_operation(operation: &'static str, status: &'static str, duration: Duration) {
    counter!("room_operations_total", "operation" => operation, "status" => status).increment(1);
    histogram!("room_operation_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Metric: `room_broadcast_events_total{event}`
pub fn record_broadcast(event: &'static str) {
    counter!("room_broadcast_events_total", "event" => event).increment(1);
}

/// A connection could not take a broadcast and was dropped.
///
/// Metric: `room_broadcast_failures_total`
pub fn record_broadcast_failure() {
    counter!("room_broadcast_failures_total").increment(1);
}

/// Metric: `room_connections_closed_total{reason}`
pub fn record_connection_closed(reason: &'static str) {
    counter!("room_connections_closed_total", "reason" => reason).increment(1);
}

/// Metric: `room_expired_total`
pub fn record_room_expired() {
    counter!("room_expired_total").increment(1);
}

/// Backpressure indicator per actor type. Rooms and connections share one
/// series per type, so the gauge shows the most recently published actor.
///
/// Metric: `room_actor_mailbox_depth{actor_type}`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// ALERT: any non-zero value indicates a bug.
///
/// Metric: `room_actor_panics_total{actor_type}`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("room_actor_panics_total", "actor_type" => actor_type).increment(1);
}
