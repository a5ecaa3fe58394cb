//! Error types for Beacon Sight

use thiserror::Error;

use crate::state::InteractionState;

/// Result type alias for Beacon Sight operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Beacon Sight
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera or image file could not produce a frame
    #[error("capture error: {0}")]
    Capture(String),

    /// Vision analysis service failure (network, auth, quota)
    #[error("backend error: {0}")]
    Backend(String),

    /// Speech recognizer failed to start or listen
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Operation invoked outside its guard state
    #[error("invalid transition: {operation} not allowed in {state}")]
    InvalidTransition {
        /// Name of the rejected operation
        operation: &'static str,
        /// State the machine was in
        state: InteractionState,
    },

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Preference persistence error
    #[error("preferences error: {0}")]
    Preferences(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error is a dropped event rather than a real failure
    #[must_use]
    pub const fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}
