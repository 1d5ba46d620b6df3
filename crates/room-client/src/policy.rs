//! Reconnect backoff.

use std::time::Duration;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Default number of consecutive reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff: `min(base_delay * 2^attempt, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..7)
            .map(|attempt| policy.delay_for(attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_large_attempt_saturates() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(40), policy.max_delay);
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_base_above_max_is_clamped() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(10),
            max_attempts: 1,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(10));
    }
}
