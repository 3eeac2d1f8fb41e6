//! Live connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::errors::{Error, Result};
use crate::ids::{ConnectionId, SessionId};

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered and accepting outbound messages.
    Open,
    /// Close requested; the read loop is shutting down.
    Closing,
    /// Unregistered; nothing is delivered any more.
    Closed,
}

struct Outbound {
    state: ConnectionState,
    tx: Option<mpsc::Sender<String>>,
}

/// A connected websocket client bound to exactly one session.
pub struct ClientConnection {
    id: ConnectionId,
    session_id: SessionId,
    /// State and sender share one lock so a send can never slip in after close.
    outbound: Mutex<Outbound>,
    close_signal: CancellationToken,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create an open connection that writes into `tx`.
    pub fn new(id: ConnectionId, session_id: SessionId, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            session_id,
            outbound: Mutex::new(Outbound {
                state: ConnectionState::Open,
                tx: Some(tx),
            }),
            close_signal: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Owning session.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.outbound.lock().state
    }

    /// Whether outbound messages are still accepted.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a text message for the client.
    ///
    /// Never blocks: a full queue drops the message and reports
    /// [`Error::SendQueueFull`].
    pub fn send(&self, message: impl Into<String>) -> Result<()> {
        let outbound = self.outbound.lock();
        let tx = match (&outbound.state, &outbound.tx) {
            (ConnectionState::Open, Some(tx)) => tx,
            _ => return Err(Error::ConnectionClosed(self.id.clone())),
        };
        match tx.try_send(message.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(Error::SendQueueFull(self.id.clone()))
            }
            Err(TrySendError::Closed(_)) => Err(Error::ConnectionClosed(self.id.clone())),
        }
    }

    /// Serialize a JSON value and queue it.
    pub fn send_json(&self, value: &serde_json::Value) -> Result<()> {
        self.send(value.to_string())
    }

    /// Ask the connection's read loop to stop. Idempotent.
    pub fn request_close(&self) {
        {
            let mut outbound = self.outbound.lock();
            if outbound.state == ConnectionState::Open {
                outbound.state = ConnectionState::Closing;
            }
        }
        self.close_signal.cancel();
    }

    /// Final transition: drop the sender so the writer drains and exits.
    pub(crate) fn mark_closed(&self) {
        {
            let mut outbound = self.outbound.lock();
            outbound.state = ConnectionState::Closed;
            outbound.tx = None;
        }
        self.close_signal.cancel();
    }

    /// Resolves once a close has been requested or the connection was closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close_signal.cancelled()
    }

    /// Total messages dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or other activity received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the peer last answered a ping.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Take the alive flag, leaving it cleared for the next ping round.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("session_id", &self.session_id.redacted())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
