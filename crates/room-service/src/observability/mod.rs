//! Observability for the room service: Prometheus metrics and health probes.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Display names never appear in metric labels, and log events carry them
//! only at debug level.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
