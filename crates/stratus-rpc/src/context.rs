//! Per-call context handed to every method handler.

use std::sync::Arc;

use stratus_core::{
    BroadcastReport, BroadcastTarget, ConnectionId, ConnectionRegistry, Session, SessionData,
    SessionId, SessionStore,
};

use crate::errors::RpcError;

/// Who is calling and what they can reach.
///
/// Clones share the same store and registry.
#[derive(Clone)]
pub struct CallContext {
    session_id: SessionId,
    connection_id: Option<ConnectionId>,
    sessions: Arc<SessionStore>,
    connections: Arc<ConnectionRegistry>,
}

impl CallContext {
    /// Context for a call made on behalf of `session_id`.
    pub fn new(
        session_id: SessionId,
        sessions: Arc<SessionStore>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            session_id,
            connection_id: None,
            sessions,
            connections,
        }
    }

    /// Attach the connection the call arrived on.
    #[must_use]
    pub fn with_connection(mut self, connection_id: ConnectionId) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    /// The caller's session id.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The connection the call arrived on (`None` for HTTP calls).
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection_id.as_ref()
    }

    /// The session store.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Fresh snapshot of the caller's session.
    pub fn session(&self) -> Result<Session, RpcError> {
        Ok(self.sessions.get_session(&self.session_id)?)
    }

    /// Mutate the caller's session data atomically.
    pub fn update_session<R>(
        &self,
        mutator: impl FnOnce(&mut SessionData) -> R,
    ) -> Result<R, RpcError> {
        Ok(self.sessions.update(&self.session_id, mutator)?)
    }

    /// Broadcast a message through the connection registry.
    pub fn broadcast(&self, message: &str, target: &BroadcastTarget) -> BroadcastReport {
        self.connections.broadcast(message, target)
    }

    /// Push a message back to the calling connection, if there is one.
    pub fn reply(&self, message: impl Into<String>) -> Result<(), RpcError> {
        let Some(id) = &self.connection_id else {
            return Err(RpcError::handler("call did not arrive on a connection"));
        };
        Ok(self.connections.send(id, message)?)
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("session_id", &self.session_id.redacted())
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}
