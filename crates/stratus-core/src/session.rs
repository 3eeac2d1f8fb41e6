//! In-memory session store.
//!
//! Sessions live in a sharded [`DashMap`]; each entry holds its own
//! [`Mutex`]. Lookups clone the entry's `Arc` and drop the shard guard before
//! locking, so mutations on one session never block another session, and
//! every mutation runs under exclusive access to a single session's state.
//!
//! Expiry is delegated to an [`ExpiryPolicy`]. An expired session is removed
//! on the next lookup and reported as [`Error::SessionNotFound`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::ids::SessionId;

/// Application key-value data attached to a session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionData(Map<String, Value>);

impl SessionData {
    /// Empty data map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value under `key`, `None` if absent or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Integer value under `key`, `None` if absent or not an integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Boolean value under `key`, `None` if absent or not a boolean.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Deserialize the value under `key` into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Clone the data into a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Point-in-time snapshot of a session.
#[derive(Clone, Debug)]
pub struct Session {
    /// Session token.
    pub id: SessionId,
    /// Application data.
    pub data: SessionData,
    /// Whether the session passed the auth gate.
    pub authenticated: bool,
}

struct SessionState {
    data: SessionData,
    authenticated: bool,
    created_at: Instant,
    last_seen: Instant,
}

impl SessionState {
    fn new(now: Instant) -> Self {
        Self {
            data: SessionData::new(),
            authenticated: false,
            created_at: now,
            last_seen: now,
        }
    }

    fn snapshot(&self, id: &SessionId) -> Session {
        Session {
            id: id.clone(),
            data: self.data.clone(),
            authenticated: self.authenticated,
        }
    }
}

/// Decides when a session stops being valid.
pub trait ExpiryPolicy: Send + Sync {
    /// Whether a session created at `created_at` and last used at
    /// `last_seen` is expired at `now`.
    fn is_expired(&self, created_at: Instant, last_seen: Instant, now: Instant) -> bool;
}

/// Sessions live until destroyed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverExpire;

impl ExpiryPolicy for NeverExpire {
    fn is_expired(&self, _created_at: Instant, _last_seen: Instant, _now: Instant) -> bool {
        false
    }
}

/// Sessions expire after a period without use.
#[derive(Clone, Copy, Debug)]
pub struct IdleTimeout(pub Duration);

impl ExpiryPolicy for IdleTimeout {
    fn is_expired(&self, _created_at: Instant, last_seen: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_seen) > self.0
    }
}

/// Owner of all session state.
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Mutex<SessionState>>>,
    policy: Box<dyn ExpiryPolicy>,
}

impl SessionStore {
    /// Store whose sessions never expire.
    pub fn new() -> Self {
        Self::with_policy(NeverExpire)
    }

    /// Store with a custom expiry policy.
    pub fn with_policy(policy: impl ExpiryPolicy + 'static) -> Self {
        Self {
            sessions: DashMap::new(),
            policy: Box::new(policy),
        }
    }

    /// Allocate a fresh session with empty data, not authenticated.
    pub fn create_session(&self) -> Session {
        let now = Instant::now();
        loop {
            let id = SessionId::generate();
            if let dashmap::Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                let state = SessionState::new(now);
                let session = state.snapshot(&id);
                let _ = slot.insert(Arc::new(Mutex::new(state)));
                debug!(session_id = id.redacted(), "session created");
                return session;
            }
        }
    }

    /// Look up a session snapshot.
    pub fn get_session(&self, id: &SessionId) -> Result<Session> {
        let state = self.entry(id)?;
        let guard = state.lock();
        Ok(guard.snapshot(id))
    }

    /// Apply `mutator` to the session's data under exclusive access.
    ///
    /// Also refreshes the session's last-seen time.
    pub fn update<R>(&self, id: &SessionId, mutator: impl FnOnce(&mut SessionData) -> R) -> Result<R> {
        let state = self.entry(id)?;
        let mut guard = state.lock();
        guard.last_seen = Instant::now();
        Ok(mutator(&mut guard.data))
    }

    /// Set the authenticated flag and return the updated snapshot.
    pub fn set_authenticated(&self, id: &SessionId, authenticated: bool) -> Result<Session> {
        let state = self.entry(id)?;
        let mut guard = state.lock();
        guard.authenticated = authenticated;
        guard.last_seen = Instant::now();
        Ok(guard.snapshot(id))
    }

    /// Refresh the session's last-seen time.
    pub fn touch(&self, id: &SessionId) -> Result<()> {
        let state = self.entry(id)?;
        state.lock().last_seen = Instant::now();
        Ok(())
    }

    /// Remove a session. Returns whether it existed; removing twice is fine.
    pub fn destroy_session(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session_id = id.redacted(), "session destroyed");
        }
        removed
    }

    /// Whether a live session exists under `id`.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.entry(id).is_ok()
    }

    /// Number of stored sessions (including not yet purged expired ones).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, state| {
            let s = state.lock();
            !self.policy.is_expired(s.created_at, s.last_seen, now)
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, "purged expired sessions");
        }
        removed
    }

    fn entry(&self, id: &SessionId) -> Result<Arc<Mutex<SessionState>>> {
        let state = self
            .sessions
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::SessionNotFound(id.clone()))?;

        let expired = {
            let s = state.lock();
            self.policy.is_expired(s.created_at, s.last_seen, Instant::now())
        };
        if expired {
            let _ = self.sessions.remove(id);
            debug!(session_id = id.redacted(), "session expired");
            return Err(Error::SessionNotFound(id.clone()));
        }
        Ok(state)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
