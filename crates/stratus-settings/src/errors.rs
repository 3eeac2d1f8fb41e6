//! Settings error types.

/// Why settings could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON, or does not fit the schema.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but the server cannot run with it.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Dotted camelCase key, as written in the settings file.
        key: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Result alias for settings loading.
pub type Result<T> = std::result::Result<T, SettingsError>;
