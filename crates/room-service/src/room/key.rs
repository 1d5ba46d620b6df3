//! Room keys: case-insensitive room identity and key generation.

use crate::errors::RoomError;

use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use tracing::error;

/// Upper bound on key length, for both parsing and generation.
pub const MAX_KEY_LENGTH: usize = 32;

/// Base-36 alphabet used for generated keys.
const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Largest multiple of 36 that fits in a byte; bytes at or above it are
/// discarded so every symbol is equally likely.
const UNBIASED_LIMIT: u8 = 252;

/// Normalized room key.
///
/// Keys compare case-insensitively: parsing uppercases, so `abc123` and
/// `ABC123` address the same room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey(String);

impl RoomKey {
    /// Parse a client-supplied key.
    ///
    /// Surrounding whitespace is ignored. A key that is empty, longer than
    /// [`MAX_KEY_LENGTH`], or contains anything but ASCII letters and digits
    /// cannot name a room, so it is reported as `RoomNotFound`.
    pub fn parse(raw: &str) -> Result<Self, RoomError> {
        let trimmed = raw.trim();

        if trimmed.is_empty()
            || trimmed.len() > MAX_KEY_LENGTH
            || !trimmed.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(RoomError::RoomNotFound);
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Generate a random uppercase base-36 key of `len` characters
    /// (clamped to `1..=MAX_KEY_LENGTH`).
    pub fn generate(len: usize) -> Result<Self, RoomError> {
        let len = len.clamp(1, MAX_KEY_LENGTH);
        let rng = SystemRandom::new();
        let mut key = String::with_capacity(len);
        let mut buf = [0u8; MAX_KEY_LENGTH];

        while key.len() < len {
            rng.fill(&mut buf).map_err(|_| {
                error!(target: "room.key", "Failed to generate random bytes");
                RoomError::Internal("random source unavailable".to_string())
            })?;

            for byte in buf {
                if key.len() == len {
                    break;
                }
                if byte >= UNBIASED_LIMIT {
                    continue;
                }
                if let Some(symbol) = ALPHABET.get(usize::from(byte % 36)) {
                    key.push(char::from(*symbol));
                }
            }
        }

        Ok(Self(key))
    }

    /// The normalized key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
