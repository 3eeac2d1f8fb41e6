//! Core error types.

use thiserror::Error;

use crate::ids::{ConnectionId, SessionId};

/// Errors raised by the session store, auth gate and connection registry.
#[derive(Debug, Error)]
pub enum Error {
    /// No live session under this identifier (absent, destroyed or expired).
    #[error("session '{}' not found", .0.redacted())]
    SessionNotFound(SessionId),

    /// The request or connection is not backed by an authenticated session.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The connection was closed before the message could be queued.
    #[error("connection '{0}' is closed")]
    ConnectionClosed(ConnectionId),

    /// The connection's outbound queue is full; the message was dropped.
    #[error("send queue full for connection '{0}'")]
    SendQueueFull(ConnectionId),

    /// A connection with this identifier is already registered.
    #[error("connection '{0}' is already registered")]
    DuplicateConnection(ConnectionId),
}

impl Error {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SessionNotFound",
            Self::AuthenticationRequired => "AuthenticationRequired",
            Self::ConnectionClosed(_) => "ConnectionClosed",
            Self::SendQueueFull(_) => "SendQueueFull",
            Self::DuplicateConnection(_) => "DuplicateConnection",
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
