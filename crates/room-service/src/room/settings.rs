//! Settings schema validation.

use crate::errors::RoomError;

use room_protocol::Settings;
use serde_json::Value;

/// Maximum number of top-level settings keys.
pub const MAX_SETTINGS_KEYS: usize = 64;

/// Maximum length of a settings key, in characters.
pub const MAX_SETTINGS_KEY_LENGTH: usize = 64;

/// Maximum serialized size of a settings object, in bytes.
pub const MAX_SETTINGS_BYTES: usize = 16 * 1024;

/// Validates a proposed settings object before it replaces the current one.
pub trait SettingsValidator: Send + Sync {
    /// Return the settings to store, or `InvalidSettings`.
    fn validate(&self, proposed: Value) -> Result<Settings, RoomError>;
}

/// Default validator: any JSON object within the size limits.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonObjectValidator;

impl SettingsValidator for JsonObjectValidator {
    fn validate(&self, proposed: Value) -> Result<Settings, RoomError> {
        let Value::Object(settings) = proposed else {
            return Err(RoomError::InvalidSettings(
                "settings must be a JSON object".to_string(),
            ));
        };

        if settings.len() > MAX_SETTINGS_KEYS {
            return Err(RoomError::InvalidSettings(format!(
                "at most {MAX_SETTINGS_KEYS} keys allowed"
            )));
        }

        if let Some(key) = settings
            .keys()
            .find(|k| k.trim().is_empty() || k.chars().count() > MAX_SETTINGS_KEY_LENGTH)
        {
            return Err(RoomError::InvalidSettings(format!(
                "invalid key {key:?}: keys must be 1-{MAX_SETTINGS_KEY_LENGTH} characters"
            )));
        }

        let size = serde_json::to_vec(&settings)
            .map_err(|e| RoomError::InvalidSettings(format!("unserializable settings: {e}")))?
            .len();
        if size > MAX_SETTINGS_BYTES {
            return Err(RoomError::InvalidSettings(format!(
                "settings exceed {MAX_SETTINGS_BYTES} bytes"
            )));
        }

        Ok(settings)
    }
}
