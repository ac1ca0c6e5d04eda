use thiserror::Error;

/// Shown when the engine connection attempt fails.
pub const CONNECT_FAILED_MESSAGE: &str = "Unable to connect to player.";
/// Shown when the user acts before the engine connection is ready.
pub const NOT_READY_MESSAGE: &str = "Player is not ready yet.";
/// Used when the engine reports a failure without any text.
pub const PLAYBACK_ERROR_FALLBACK: &str = "Playback error";

/// The failures that reach the UI.  Everything else (persistence, malformed
/// stored data) is logged and absorbed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("{}", CONNECT_FAILED_MESSAGE)]
    Connection,
    #[error("{}", NOT_READY_MESSAGE)]
    NotReady,
    #[error("{0}")]
    Playback(String),
}

impl CoreError {
    /// Build a playback error, substituting the fallback text for empty messages.
    pub fn playback(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::Playback(PLAYBACK_ERROR_FALLBACK.to_string())
        } else {
            Self::Playback(message)
        }
    }

    /// Text for `UiState::error_message`.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings encoding: {0}")]
    Json(#[from] serde_json::Error),
}
