//! Room service configuration.
//!
//! Configuration is loaded from environment variables. Numeric values that
//! fail to parse fall back to their defaults; values that parse but make no
//! sense (zero limits, a connection timeout not longer than the heartbeat)
//! are rejected.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8787";

/// Default generated room key length.
pub const DEFAULT_ROOM_KEY_LENGTH: usize = 6;

/// Default member cap per room.
pub const DEFAULT_MAX_USERS_PER_ROOM: usize = 20;

/// Default idle timeout before a room expires, in minutes.
pub const DEFAULT_ROOM_TIMEOUT_MINUTES: u64 = 60;

/// Default per-IP room creation quota (enforced by the upstream gateway).
pub const DEFAULT_MAX_ROOMS_PER_IP: u32 = 5;

/// Default interval between liveness probes, in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Default time without an acknowledgment before a connection is dropped, in milliseconds.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 60_000;

/// Default connection cap per room.
pub const DEFAULT_MAX_CONNECTIONS_PER_ROOM: usize = 50;

/// Default period of the idle-expiry check, in seconds.
pub const DEFAULT_IDLE_CHECK_INTERVAL_SECONDS: u64 = 60;

/// Default bound on graceful shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

/// Default service instance ID prefix.
pub const DEFAULT_SERVICE_ID_PREFIX: &str = "room";

/// Limits and timers consumed by each room actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomLimits {
    /// Maximum number of admitted members.
    pub max_users_per_room: usize,
    /// Maximum number of simultaneously registered connections.
    pub max_connections_per_room: usize,
    /// Idle period after which the room expires.
    pub room_timeout: Duration,
    /// Interval between liveness probes.
    pub heartbeat_interval: Duration,
    /// Time without an acknowledgment after which a connection is dropped.
    pub connection_timeout: Duration,
    /// Period of the idle-expiry check.
    pub idle_check_interval: Duration,
    /// Whether heartbeat acknowledgments count as room activity.
    pub heartbeat_keeps_alive: bool,
}

impl Default for RoomLimits {
    fn default() -> Self {
        Self {
            max_users_per_room: DEFAULT_MAX_USERS_PER_ROOM,
            max_connections_per_room: DEFAULT_MAX_CONNECTIONS_PER_ROOM,
            room_timeout: Duration::from_secs(DEFAULT_ROOM_TIMEOUT_MINUTES * 60),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            connection_timeout: Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS),
            idle_check_interval: Duration::from_secs(DEFAULT_IDLE_CHECK_INTERVAL_SECONDS),
            heartbeat_keeps_alive: false,
        }
    }
}

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:8787").
    pub bind_address: String,

    /// Unique identifier for this service instance.
    pub service_id: String,

    /// Length of generated room keys.
    pub room_key_length: usize,

    /// Per-IP room creation quota. Enforced upstream; logged at startup only.
    pub max_rooms_per_ip: u32,

    /// Per-room limits and timers.
    pub limits: RoomLimits,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Bound on graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("service_id", &self.service_id)
            .field("room_key_length", &self.room_key_length)
            .field("max_rooms_per_ip", &self.max_rooms_per_ip)
            .field("max_users_per_room", &self.limits.max_users_per_room)
            .field(
                "max_connections_per_room",
                &self.limits.max_connections_per_room,
            )
            .field("room_timeout_secs", &self.limits.room_timeout.as_secs())
            .field(
                "heartbeat_interval_ms",
                &self.limits.heartbeat_interval.as_millis(),
            )
            .field(
                "connection_timeout_ms",
                &self.limits.connection_timeout.as_millis(),
            )
            .field(
                "idle_check_interval_secs",
                &self.limits.idle_check_interval.as_secs(),
            )
            .field("heartbeat_keeps_alive", &self.limits.heartbeat_keeps_alive)
            .field("json_logs", &self.json_logs)
            .field("shutdown_timeout_secs", &self.shutdown_timeout.as_secs())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("ROOM_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let room_key_length = vars
            .get("ROOM_KEY_LENGTH")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_ROOM_KEY_LENGTH);

        let max_users_per_room = vars
            .get("MAX_USERS_PER_ROOM")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_USERS_PER_ROOM);

        let room_timeout_minutes: u64 = vars
            .get("ROOM_TIMEOUT_MINUTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_ROOM_TIMEOUT_MINUTES);

        let max_rooms_per_ip = vars
            .get("MAX_ROOMS_PER_IP")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_ROOMS_PER_IP);

        let heartbeat_interval_ms: u64 = vars
            .get("WS_HEARTBEAT_INTERVAL")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);

        let connection_timeout_ms: u64 = vars
            .get("WS_CONNECTION_TIMEOUT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_MS);

        let max_connections_per_room = vars
            .get("MAX_CONNECTIONS_PER_ROOM")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_ROOM);

        let idle_check_interval_seconds: u64 = vars
            .get("ROOM_IDLE_CHECK_INTERVAL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_IDLE_CHECK_INTERVAL_SECONDS);

        let heartbeat_keeps_alive = vars
            .get("ROOM_HEARTBEAT_KEEPS_ALIVE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        let shutdown_timeout_seconds: u64 = vars
            .get("ROOM_SHUTDOWN_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS);

        let json_logs = vars
            .get("ROOM_LOG_FORMAT")
            .is_some_and(|s| s.eq_ignore_ascii_case("json"));

        for (name, value) in [
            ("ROOM_KEY_LENGTH", room_key_length),
            ("MAX_USERS_PER_ROOM", max_users_per_room),
            ("MAX_CONNECTIONS_PER_ROOM", max_connections_per_room),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        for (name, value) in [
            ("ROOM_TIMEOUT_MINUTES", room_timeout_minutes),
            ("WS_HEARTBEAT_INTERVAL", heartbeat_interval_ms),
            ("ROOM_IDLE_CHECK_INTERVAL_SECONDS", idle_check_interval_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if connection_timeout_ms <= heartbeat_interval_ms {
            return Err(ConfigError::InvalidValue(format!(
                "WS_CONNECTION_TIMEOUT ({connection_timeout_ms}ms) must exceed \
                 WS_HEARTBEAT_INTERVAL ({heartbeat_interval_ms}ms)"
            )));
        }

        let service_id = vars.get("ROOM_SERVICE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SERVICE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            service_id,
            room_key_length,
            max_rooms_per_ip,
            limits: RoomLimits {
                max_users_per_room,
                max_connections_per_room,
                room_timeout: Duration::from_secs(room_timeout_minutes.saturating_mul(60)),
                heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
                connection_timeout: Duration::from_millis(connection_timeout_ms),
                idle_check_interval: Duration::from_secs(idle_check_interval_seconds),
                heartbeat_keeps_alive,
            },
            json_logs,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_seconds),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([("ROOM_SERVICE_ID".to_string(), "room-test-001".to_string())])
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.service_id, "room-test-001");
        assert_eq!(config.room_key_length, 6);
        assert_eq!(config.max_rooms_per_ip, 5);
        assert_eq!(config.limits, RoomLimits::default());
        assert_eq!(config.limits.room_timeout, Duration::from_secs(3600));
        assert_eq!(config.limits.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.limits.connection_timeout, Duration::from_secs(60));
        assert!(!config.json_logs);
    }

    #[test]
    fn test_overrides() {
        let mut vars = base_vars();
        vars.insert("ROOM_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("MAX_USERS_PER_ROOM".to_string(), "5".to_string());
        vars.insert("ROOM_TIMEOUT_MINUTES".to_string(), "2".to_string());
        vars.insert("WS_HEARTBEAT_INTERVAL".to_string(), "1000".to_string());
        vars.insert("WS_CONNECTION_TIMEOUT".to_string(), "2500".to_string());
        vars.insert("ROOM_HEARTBEAT_KEEPS_ALIVE".to_string(), "true".to_string());
        vars.insert("ROOM_LOG_FORMAT".to_string(), "JSON".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.limits.max_users_per_room, 5);
        assert_eq!(config.limits.room_timeout, Duration::from_secs(120));
        assert_eq!(config.limits.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(
            config.limits.connection_timeout,
            Duration::from_millis(2500)
        );
        assert!(config.limits.heartbeat_keeps_alive);
        assert!(config.json_logs);
    }

    #[test]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("MAX_USERS_PER_ROOM".to_string(), "lots".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.limits.max_users_per_room, DEFAULT_MAX_USERS_PER_ROOM);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut vars = base_vars();
        vars.insert("MAX_CONNECTIONS_PER_ROOM".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue(msg)) if msg.contains("MAX_CONNECTIONS_PER_ROOM")
        ));
    }

    #[test]
    fn test_connection_timeout_must_exceed_heartbeat() {
        let mut vars = base_vars();
        vars.insert("WS_HEARTBEAT_INTERVAL".to_string(), "5000".to_string());
        vars.insert("WS_CONNECTION_TIMEOUT".to_string(), "5000".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_generated_service_id_has_prefix() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert!(config.service_id.starts_with("room-"));
    }

    #[test]
    fn test_debug_output_lists_limits() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("max_users_per_room: 20"));
        assert!(debug.contains("heartbeat_keeps_alive: false"));
    }
}
