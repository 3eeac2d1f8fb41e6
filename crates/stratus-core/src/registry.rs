//! Connection registry and message fan-out.
//!
//! Structural changes (register/unregister) take a short write lock over two
//! indexes: connection id → connection, and session id → connection ids.
//! Broadcasts take a snapshot under the read lock, release it, then send to
//! each target independently. Sends never block, so one slow client cannot
//! stall delivery to the others, and a failed send never aborts the rest.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::connection::ClientConnection;
use crate::errors::{Error, Result};
use crate::ids::{ConnectionId, SessionId};
use crate::session::{SessionData, SessionStore};

/// Predicate over session data used for targeted broadcasts.
pub type SessionPredicate = Arc<dyn Fn(&SessionData) -> bool + Send + Sync>;

/// Which connections a broadcast reaches.
#[derive(Clone)]
pub enum BroadcastTarget {
    /// Every open connection.
    All,
    /// One specific connection.
    Connection(ConnectionId),
    /// Every connection owned by a session.
    Session(SessionId),
    /// Every connection whose session data satisfies the predicate.
    Matching(SessionPredicate),
}

impl BroadcastTarget {
    /// Build a [`BroadcastTarget::Matching`] from a closure.
    pub fn matching(predicate: impl Fn(&SessionData) -> bool + Send + Sync + 'static) -> Self {
        Self::Matching(Arc::new(predicate))
    }
}

impl fmt::Debug for BroadcastTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Connection(id) => f.debug_tuple("Connection").field(id).finish(),
            Self::Session(id) => f.debug_tuple("Session").field(&id.redacted()).finish(),
            Self::Matching(_) => f.write_str("Matching(..)"),
        }
    }
}

/// Outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections that were closed or had a full queue.
    pub failed: usize,
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<ConnectionId, Arc<ClientConnection>>,
    by_session: HashMap<SessionId, HashSet<ConnectionId>>,
}

/// Tracks every live connection.
pub struct ConnectionRegistry {
    indexes: RwLock<Indexes>,
    sessions: Arc<SessionStore>,
}

impl ConnectionRegistry {
    /// Create an empty registry. `sessions` resolves predicate targets.
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
            sessions,
        }
    }

    /// Add a connection, indexed by its id and by its session.
    pub fn register(&self, connection: Arc<ClientConnection>) -> Result<()> {
        let mut idx = self.indexes.write();
        if idx.by_id.contains_key(connection.id()) {
            return Err(Error::DuplicateConnection(connection.id().clone()));
        }
        let _ = idx
            .by_session
            .entry(connection.session_id().clone())
            .or_default()
            .insert(connection.id().clone());
        debug!(
            conn_id = %connection.id(),
            session_id = connection.session_id().redacted(),
            "connection registered"
        );
        let _ = idx.by_id.insert(connection.id().clone(), connection);
        Ok(())
    }

    /// Remove a connection from every index and close it. Idempotent.
    ///
    /// Returns the removed connection, or `None` if it was not registered.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = {
            let mut idx = self.indexes.write();
            let removed = idx.by_id.remove(connection_id)?;
            let session_id = removed.session_id();
            if let Some(set) = idx.by_session.get_mut(session_id) {
                let _ = set.remove(connection_id);
                if set.is_empty() {
                    let _ = idx.by_session.remove(session_id);
                }
            }
            // Closed while still under the write lock so no snapshot taken
            // after this point can see it open.
            removed.mark_closed();
            removed
        };
        debug!(conn_id = %connection_id, "connection unregistered");
        Some(removed)
    }

    /// Look up a connection.
    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.indexes.read().by_id.get(connection_id).cloned()
    }

    /// Push a message to exactly one connection.
    pub fn send(&self, connection_id: &ConnectionId, message: impl Into<String>) -> Result<()> {
        let connection = self
            .get(connection_id)
            .ok_or_else(|| Error::ConnectionClosed(connection_id.clone()))?;
        connection.send(message)
    }

    /// Push a message to every connection matching `target`.
    pub fn broadcast(&self, message: &str, target: &BroadcastTarget) -> BroadcastReport {
        let recipients = self.snapshot(target);
        let mut report = BroadcastReport::default();
        for conn in &recipients {
            match conn.send(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    counter!("ws_broadcast_drops_total").increment(1);
                    warn!(conn_id = %conn.id(), error = %e, "failed to deliver broadcast");
                }
            }
        }
        debug!(
            ?target,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast"
        );
        report
    }

    /// Push a message to every open connection.
    pub fn broadcast_all(&self, message: &str) -> BroadcastReport {
        self.broadcast(message, &BroadcastTarget::All)
    }

    /// Request every connection of a session to close. Returns how many.
    pub fn close_session(&self, session_id: &SessionId) -> usize {
        let conns = self.session_connections(session_id);
        for conn in &conns {
            conn.request_close();
        }
        conns.len()
    }

    /// Request a single connection to close. Returns whether it was registered.
    pub fn close(&self, connection_id: &ConnectionId) -> bool {
        match self.get(connection_id) {
            Some(conn) => {
                conn.request_close();
                true
            }
            None => false,
        }
    }

    /// Request every connection to close (server shutdown).
    pub fn close_all(&self) -> usize {
        let conns: Vec<_> = self.indexes.read().by_id.values().cloned().collect();
        for conn in &conns {
            conn.request_close();
        }
        conns.len()
    }

    /// Connections owned by a session.
    pub fn session_connections(&self, session_id: &SessionId) -> Vec<Arc<ClientConnection>> {
        let idx = self.indexes.read();
        idx.by_session
            .get(session_id)
            .map(|ids| ids.iter().filter_map(|id| idx.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.indexes.read().by_id.len()
    }

    /// Number of sessions with at least one connection.
    pub fn session_count(&self) -> usize {
        self.indexes.read().by_session.len()
    }

    fn snapshot(&self, target: &BroadcastTarget) -> Vec<Arc<ClientConnection>> {
        match target {
            BroadcastTarget::All => self.indexes.read().by_id.values().cloned().collect(),
            BroadcastTarget::Connection(id) => self.get(id).into_iter().collect(),
            BroadcastTarget::Session(id) => self.session_connections(id),
            BroadcastTarget::Matching(predicate) => {
                let by_session: Vec<(SessionId, Vec<Arc<ClientConnection>>)> = {
                    let idx = self.indexes.read();
                    idx.by_session
                        .iter()
                        .map(|(sid, ids)| {
                            let conns = ids.iter().filter_map(|id| idx.by_id.get(id).cloned());
                            (sid.clone(), conns.collect())
                        })
                        .collect()
                };
                // Session locks are taken only after the registry lock is released.
                by_session
                    .into_iter()
                    .filter(|(sid, _)| {
                        self.sessions
                            .get_session(sid)
                            .is_ok_and(|s| predicate(&s.data))
                    })
                    .flat_map(|(_, conns)| conns)
                    .collect()
            }
        }
    }
}
