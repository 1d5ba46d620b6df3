//! Room domain: keys, the state machine, and settings validation.

pub mod key;
pub mod settings;
pub mod state;

pub use key::RoomKey;
pub use settings::{JsonObjectValidator, SettingsValidator};
pub use state::{normalize_name, JoinOutcome, RoomPhase, RoomState};
