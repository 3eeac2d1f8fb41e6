//! `/health` endpoint.

use serde::Serialize;

use crate::server::AppState;

/// Liveness of the listener, as reported while it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServingState {
    /// Accepting logins, upgrades and calls.
    Ok,
    /// Shutdown has begun; open sockets are being closed.
    Draining,
}

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Serving state.
    pub status: ServingState,
    /// Whole seconds since the server was built.
    pub uptime_secs: u64,
    /// Open websocket connections.
    pub connections: usize,
    /// Sessions with at least one open connection.
    pub active_sessions: usize,
    /// Sessions held by the store, connected or not.
    pub stored_sessions: usize,
    /// Registered RPC methods.
    pub rpc_methods: usize,
}

impl HealthReport {
    /// Read the live counters off the server state.
    pub fn snapshot(state: &AppState) -> Self {
        let status = if state.shutdown.is_shutting_down() {
            ServingState::Draining
        } else {
            ServingState::Ok
        };
        Self {
            status,
            uptime_secs: state.start_time.elapsed().as_secs(),
            connections: state.connections.connection_count(),
            active_sessions: state.connections.session_count(),
            stored_sessions: state.sessions.len(),
            rpc_methods: state.methods.len(),
        }
    }
}
