//! Application callbacks for websocket connections.

use std::sync::Arc;

use async_trait::async_trait;
use stratus_core::{
    BroadcastReport, BroadcastTarget, ClientConnection, ConnectionId, ConnectionRegistry,
    Session, SessionData, SessionId, SessionStore,
};

/// Handle to the connection a callback is running for.
///
/// Cheap to clone. Holds the connection itself plus the shared session
/// store and connection registry.
#[derive(Clone)]
pub struct ConnectionContext {
    connection: Arc<ClientConnection>,
    sessions: Arc<SessionStore>,
    connections: Arc<ConnectionRegistry>,
}

impl ConnectionContext {
    /// Bind a context to `connection`.
    pub fn new(
        connection: Arc<ClientConnection>,
        sessions: Arc<SessionStore>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            connection,
            sessions,
            connections,
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// Owning session id.
    pub fn session_id(&self) -> &SessionId {
        self.connection.session_id()
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// The session store.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Fresh snapshot of the owning session.
    pub fn session(&self) -> stratus_core::Result<Session> {
        self.sessions.get_session(self.session_id())
    }

    /// Mutate the owning session's data atomically.
    pub fn update_session<R>(
        &self,
        mutator: impl FnOnce(&mut SessionData) -> R,
    ) -> stratus_core::Result<R> {
        self.sessions.update(self.session_id(), mutator)
    }

    /// Queue a message on this connection.
    pub fn send(&self, message: impl Into<String>) -> stratus_core::Result<()> {
        self.connection.send(message)
    }

    /// Push a message to every connection matching `target`.
    pub fn broadcast(&self, message: &str, target: &BroadcastTarget) -> BroadcastReport {
        self.connections.broadcast(message, target)
    }

    /// Ask the connection loop to close this connection.
    pub fn close(&self) {
        self.connection.request_close();
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("conn_id", self.id())
            .field("session_id", &self.session_id().redacted())
            .finish_non_exhaustive()
    }
}

/// Connect, message and disconnect callbacks.
///
/// Every method defaults to a no-op. `on_disconnect` runs exactly once per
/// connection, after it has left the registry.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// A connection was registered.
    async fn on_connect(&self, _ctx: &ConnectionContext, _session: &Session) {}

    /// A frame that is not an RPC call arrived.
    async fn on_message(&self, _ctx: &ConnectionContext, _session: Session, _message: String) {}

    /// The connection is gone.
    async fn on_disconnect(&self, _ctx: &ConnectionContext) {}
}

/// A handler that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

#[async_trait]
impl ConnectionHandler for NoopHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_context() -> (ConnectionContext, mpsc::Receiver<String>) {
        let sessions = Arc::new(SessionStore::new());
        let connections = Arc::new(ConnectionRegistry::new(Arc::clone(&sessions)));
        let session = sessions.create_session();
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(ConnectionId::generate(), session.id, tx));
        connections.register(Arc::clone(&conn)).unwrap();
        (ConnectionContext::new(conn, sessions, connections), rx)
    }

    #[test]
    fn send_reaches_own_queue() {
        let (ctx, mut rx) = make_context();
        ctx.send("hi").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hi");
    }

    #[test]
    fn update_session_is_visible() {
        let (ctx, _rx) = make_context();
        let _ = ctx.update_session(|d| d.insert("k", 1)).unwrap();
        assert_eq!(ctx.session().unwrap().data.get_i64("k"), Some(1));
    }

    #[test]
    fn close_rejects_further_sends() {
        let (ctx, _rx) = make_context();
        ctx.close();
        assert!(!ctx.connection().is_open());
        assert!(ctx.send("late").is_err());
    }

    #[test]
    fn broadcast_counts_self() {
        let (ctx, mut rx) = make_context();
        let report = ctx.broadcast("all", &BroadcastTarget::All);
        assert_eq!(report.delivered, 1);
        assert_eq!(rx.try_recv().unwrap(), "all");
    }

    #[tokio::test]
    async fn noop_handler_does_nothing() {
        let (ctx, mut rx) = make_context();
        let session = ctx.session().unwrap();
        NoopHandler.on_connect(&ctx, &session).await;
        NoopHandler.on_message(&ctx, session, "x".into()).await;
        NoopHandler.on_disconnect(&ctx).await;
        assert!(rx.try_recv().is_err());
    }
}
