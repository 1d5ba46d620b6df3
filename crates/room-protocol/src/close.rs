//! Application close codes (WebSocket private-use range 4000-4999).

/// Reason the server closed a real-time connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// A newer connection for the same member replaced this one.
    Superseded = 4000,
    /// The room expired after its idle timeout.
    RoomExpired = 4001,
    /// No liveness acknowledgment within the connection timeout.
    HeartbeatTimeout = 4002,
    /// The room refused the registration (not a member, registry full, no room).
    Rejected = 4003,
    /// The service is shutting down.
    ServerShutdown = 4004,
}

impl CloseCode {
    /// Numeric code placed in the close frame.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Parse a close-frame code. Unknown codes return `None`.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            4000 => Some(CloseCode::Superseded),
            4001 => Some(CloseCode::RoomExpired),
            4002 => Some(CloseCode::HeartbeatTimeout),
            4003 => Some(CloseCode::Rejected),
            4004 => Some(CloseCode::ServerShutdown),
            _ => None,
        }
    }

    /// Human-readable reason placed next to the code.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            CloseCode::Superseded => "superseded",
            CloseCode::RoomExpired => "room expired",
            CloseCode::HeartbeatTimeout => "heartbeat timeout",
            CloseCode::Rejected => "rejected",
            CloseCode::ServerShutdown => "server shutdown",
        }
    }

    /// Whether a client receiving this code must stop reconnecting.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            CloseCode::Superseded | CloseCode::RoomExpired | CloseCode::Rejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_parse_matches_discriminant() {
        for code in [
            CloseCode::Superseded,
            CloseCode::RoomExpired,
            CloseCode::HeartbeatTimeout,
            CloseCode::Rejected,
            CloseCode::ServerShutdown,
        ] {
            assert_eq!(CloseCode::from_code(code.code()), Some(code));
        }
        assert_eq!(CloseCode::from_code(1000), None);
    }

    #[test]
    fn test_terminal_codes() {
        assert!(CloseCode::RoomExpired.is_terminal());
        assert!(CloseCode::Superseded.is_terminal());
        assert!(CloseCode::Rejected.is_terminal());
        assert!(!CloseCode::HeartbeatTimeout.is_terminal());
        assert!(!CloseCode::ServerShutdown.is_terminal());
    }
}
