//! Room state machine: `Uninitialized -> Active -> Expired`.
//!
//! `RoomState` is plain data with no I/O. The owning `RoomActor` feeds it
//! one operation at a time and turns the outcomes into broadcasts, so every
//! rule about membership, moderator authority and settings lives here and
//! is testable without a runtime.

use super::key::RoomKey;
use super::settings::SettingsValidator;
use crate::errors::RoomError;

use chrono::{DateTime, Utc};
use room_protocol::{RoomSnapshot, Settings};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Maximum display name length, in characters.
pub const MAX_NAME_LENGTH: usize = 64;

/// Lifecycle phase of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Actor exists but `initialize` has not succeeded yet.
    Uninitialized,
    /// Accepting joins, settings updates and connections.
    Active,
    /// Idle timeout elapsed; state is about to be discarded.
    Expired,
}

impl RoomPhase {
    /// Returns the phase as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RoomPhase::Uninitialized => "uninitialized",
            RoomPhase::Active => "active",
            RoomPhase::Expired => "expired",
        }
    }
}

/// Result of a successful `join`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    /// State after the join.
    pub snapshot: RoomSnapshot,
    /// False when the name was already a member (idempotent join).
    pub added: bool,
}

/// Trim and validate a display name.
pub fn normalize_name(raw: &str) -> Result<String, RoomError> {
    let name = raw.trim();

    if name.is_empty() {
        return Err(RoomError::InvalidName("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(RoomError::InvalidName(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(RoomError::InvalidName(
            "name must not contain control characters".to_string(),
        ));
    }

    Ok(name.to_string())
}

/// State owned by one room.
#[derive(Debug)]
pub struct RoomState {
    key: RoomKey,
    phase: RoomPhase,
    moderator: String,
    /// Admitted names in join order. Unique.
    members: Vec<String>,
    settings: Settings,
    max_users: usize,
    created_at: DateTime<Utc>,
    last_activity_at: Instant,
}

impl RoomState {
    /// Create an uninitialized room.
    #[must_use]
    pub fn new(key: RoomKey, max_users: usize, now: Instant) -> Self {
        Self {
            key,
            phase: RoomPhase::Uninitialized,
            moderator: String::new(),
            members: Vec::new(),
            settings: Settings::new(),
            max_users,
            created_at: Utc::now(),
            last_activity_at: now,
        }
    }

    #[must_use]
    pub fn key(&self) -> &RoomKey {
        &self.key
    }

    #[must_use]
    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    #[must_use]
    pub fn members(&self) -> &[String] {
        &self.members
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m == name)
    }

    /// `Uninitialized -> Active`, admitting the moderator as first member.
    pub fn initialize(&mut self, moderator: &str, now: Instant) -> Result<RoomSnapshot, RoomError> {
        match self.phase {
            RoomPhase::Uninitialized => {}
            RoomPhase::Active => return Err(RoomError::AlreadyInitialized),
            RoomPhase::Expired => return Err(RoomError::RoomNotFound),
        }

        let moderator = normalize_name(moderator)?;

        self.members.clear();
        self.members.push(moderator.clone());
        self.moderator = moderator;
        self.settings = Settings::new();
        self.created_at = Utc::now();
        self.last_activity_at = now;
        self.phase = RoomPhase::Active;

        Ok(self.to_snapshot())
    }

    /// Admit `name`. Idempotent for names already admitted, even when full.
    pub fn join(&mut self, name: &str, now: Instant) -> Result<JoinOutcome, RoomError> {
        self.require_active()?;
        let name = normalize_name(name)?;

        if self.is_member(&name) {
            return Ok(JoinOutcome {
                snapshot: self.to_snapshot(),
                added: false,
            });
        }

        if self.members.len() >= self.max_users {
            return Err(RoomError::RoomFull);
        }

        self.members.push(name);
        self.last_activity_at = now;

        Ok(JoinOutcome {
            snapshot: self.to_snapshot(),
            added: true,
        })
    }

    /// Read-only snapshot: settings, members and moderator.
    pub fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        self.require_active()?;
        Ok(self.to_snapshot())
    }

    /// Replace the settings wholesale. Moderator only.
    ///
    /// Authority is checked before the payload is validated, so a
    /// non-moderator always gets `Forbidden`.
    pub fn update_settings(
        &mut self,
        caller: &str,
        proposed: Value,
        validator: &dyn SettingsValidator,
        now: Instant,
    ) -> Result<Settings, RoomError> {
        self.require_active()?;

        if caller.trim() != self.moderator {
            return Err(RoomError::Forbidden);
        }

        let settings = validator.validate(proposed)?;
        self.settings = settings.clone();
        self.last_activity_at = now;

        Ok(settings)
    }

    /// Record non-mutating activity (heartbeat acknowledgments, when enabled).
    pub fn touch(&mut self, now: Instant) {
        self.last_activity_at = now;
    }

    /// Whether more than `timeout` has passed since the last activity.
    #[must_use]
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity_at) > timeout
    }

    /// Enter `Expired` and return the phase the room was in.
    pub fn expire(&mut self) -> RoomPhase {
        std::mem::replace(&mut self.phase, RoomPhase::Expired)
    }

    fn require_active(&self) -> Result<(), RoomError> {
        if self.phase == RoomPhase::Active {
            Ok(())
        } else {
            Err(RoomError::RoomNotFound)
        }
    }

    fn to_snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_key: self.key.to_string(),
            moderator: self.moderator.clone(),
            members: self.members.clone(),
            settings: self.settings.clone(),
        }
    }
}
