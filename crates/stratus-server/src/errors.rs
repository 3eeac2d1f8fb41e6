//! Server error types.

use thiserror::Error;

use crate::hooks::HookError;

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An `on_startup` hook failed; the server did not start.
    #[error("startup hook failed: {0}")]
    StartupHook(#[from] HookError),

    /// The global metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),

    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
