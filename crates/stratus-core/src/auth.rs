//! Auth gate: credential checks and the authenticated flag.
//!
//! The gate never stores credentials. It asks an injected [`Authenticator`]
//! whether a credential pair is valid and, on acceptance, marks the session
//! resolved from the request as authenticated (creating one if needed). On
//! rejection the resolved session is destroyed so no partial state survives.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::ids::SessionId;
use crate::session::{Session, SessionStore};

/// Session data key holding the authenticated user name.
pub const USERNAME_KEY: &str = "username";

/// A username/password pair submitted by a client.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Plain-text password as submitted.
    pub password: String,
}

impl Credentials {
    /// Build a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn is_blank(&self) -> bool {
        self.username.is_empty() || self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Application-supplied credential check.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether the credentials are valid.
    async fn verify(&self, credentials: &Credentials) -> bool;
}

#[async_trait]
impl<F> Authenticator for F
where
    F: Fn(&Credentials) -> bool + Send + Sync,
{
    async fn verify(&self, credentials: &Credentials) -> bool {
        self(credentials)
    }
}

/// Fixed username → password table.
#[derive(Clone, Debug, Default)]
pub struct StaticUsers {
    users: HashMap<String, String>,
}

impl StaticUsers {
    /// Build from a username → password map.
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are configured.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticUsers {
    async fn verify(&self, credentials: &Credentials) -> bool {
        self.users
            .get(&credentials.username)
            .is_some_and(|expected| *expected == credentials.password)
    }
}

/// Result of an authentication attempt.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Credentials accepted; the session is now authenticated.
    Accepted(Session),
    /// Credentials rejected; any session the request carried was destroyed.
    Rejected,
}

/// Decides whether requests and connections are authenticated.
pub struct AuthGate {
    sessions: Arc<SessionStore>,
    authenticator: Arc<dyn Authenticator>,
}

impl AuthGate {
    /// Create a gate over `sessions` using `authenticator` for credential checks.
    pub fn new(sessions: Arc<SessionStore>, authenticator: impl Authenticator + 'static) -> Self {
        Self {
            sessions,
            authenticator: Arc::new(authenticator),
        }
    }

    /// The session store this gate operates on.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Check `credentials` and, on success, authenticate the session named by
    /// `session_id` (or a fresh one if it is absent or unknown).
    pub async fn authenticate(
        &self,
        session_id: Option<&SessionId>,
        credentials: &Credentials,
    ) -> AuthOutcome {
        if credentials.is_blank() || !self.authenticator.verify(credentials).await {
            warn!(username = %credentials.username, "authentication failed");
            if let Some(id) = session_id {
                let _ = self.sessions.destroy_session(id);
            }
            return AuthOutcome::Rejected;
        }

        let session = session_id
            .and_then(|id| self.sessions.get_session(id).ok())
            .unwrap_or_else(|| self.sessions.create_session());

        let username = credentials.username.clone();
        let marked = self
            .sessions
            .update(&session.id, |data| data.insert(USERNAME_KEY, username))
            .and_then(|_| self.sessions.set_authenticated(&session.id, true));

        match marked {
            Ok(session) => {
                info!(
                    username = %credentials.username,
                    session_id = session.id.redacted(),
                    "user authenticated"
                );
                AuthOutcome::Accepted(session)
            }
            Err(e) => {
                warn!(error = %e, "session vanished during authentication");
                AuthOutcome::Rejected
            }
        }
    }

    /// Resolve an authenticated session or fail with `AuthenticationRequired`.
    ///
    /// A successful check refreshes the session's last-seen time.
    pub fn require(&self, session_id: Option<&SessionId>) -> Result<Session> {
        let id = session_id.ok_or(Error::AuthenticationRequired)?;
        let session = self
            .sessions
            .get_session(id)
            .map_err(|_| Error::AuthenticationRequired)?;
        if !session.authenticated {
            return Err(Error::AuthenticationRequired);
        }
        let _ = self.sessions.touch(id);
        Ok(session)
    }

    /// Destroy the session. Returns whether it existed.
    pub fn logout(&self, session_id: &SessionId) -> bool {
        let existed = self.sessions.destroy_session(session_id);
        if existed {
            info!(session_id = session_id.redacted(), "session logged out");
        }
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthGate {
        let users = HashMap::from([("admin".to_string(), "secret".to_string())]);
        AuthGate::new(Arc::new(SessionStore::new()), StaticUsers::new(users))
    }

    #[tokio::test]
    async fn accept_creates_authenticated_session() {
        let gate = gate();
        let outcome = gate
            .authenticate(None, &Credentials::new("admin", "secret"))
            .await;
        let AuthOutcome::Accepted(session) = outcome else {
            panic!("expected acceptance");
        };
        assert!(session.authenticated);
        assert_eq!(session.data.get_str(USERNAME_KEY), Some("admin"));

        let fetched = gate.sessions().get_session(&session.id).unwrap();
        assert!(fetched.authenticated);
    }

    #[tokio::test]
    async fn accept_reuses_existing_session() {
        let gate = gate();
        let existing = gate.sessions().create_session();
        let _ = gate
            .sessions()
            .update(&existing.id, |d| d.insert("visit_count", 4))
            .unwrap();

        let outcome = gate
            .authenticate(Some(&existing.id), &Credentials::new("admin", "secret"))
            .await;
        let AuthOutcome::Accepted(session) = outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(session.id, existing.id);
        assert_eq!(session.data.get_i64("visit_count"), Some(4));
        assert_eq!(gate.sessions().len(), 1);
    }

    #[tokio::test]
    async fn accept_with_unknown_session_id_creates_new() {
        let gate = gate();
        let stale = SessionId::from_raw("stale-token");
        let AuthOutcome::Accepted(session) = gate
            .authenticate(Some(&stale), &Credentials::new("admin", "secret"))
            .await
        else {
            panic!("expected acceptance");
        };
        assert_ne!(session.id, stale);
    }

    #[tokio::test]
    async fn reject_wrong_password_destroys_session() {
        let gate = gate();
        let existing = gate.sessions().create_session();
        let outcome = gate
            .authenticate(Some(&existing.id), &Credentials::new("admin", "wrong"))
            .await;
        assert!(matches!(outcome, AuthOutcome::Rejected));
        assert!(gate.sessions().get_session(&existing.id).is_err());
    }

    #[tokio::test]
    async fn reject_leaves_authenticated_session_unauthenticated() {
        let gate = gate();
        let AuthOutcome::Accepted(session) = gate
            .authenticate(None, &Credentials::new("admin", "secret"))
            .await
        else {
            panic!("expected acceptance");
        };
        let outcome = gate
            .authenticate(Some(&session.id), &Credentials::new("admin", "nope"))
            .await;
        assert!(matches!(outcome, AuthOutcome::Rejected));
        assert!(gate.require(Some(&session.id)).is_err());
    }

    #[tokio::test]
    async fn reject_blank_credentials_without_asking_authenticator() {
        let gate = AuthGate::new(Arc::new(SessionStore::new()), |_: &Credentials| true);
        let outcome = gate.authenticate(None, &Credentials::new("", "")).await;
        assert!(matches!(outcome, AuthOutcome::Rejected));
        assert!(gate.sessions().is_empty());
    }

    #[tokio::test]
    async fn closure_authenticator() {
        let gate = AuthGate::new(Arc::new(SessionStore::new()), |c: &Credentials| {
            c.username == c.password
        });
        assert!(matches!(
            gate.authenticate(None, &Credentials::new("x", "x")).await,
            AuthOutcome::Accepted(_)
        ));
        assert!(matches!(
            gate.authenticate(None, &Credentials::new("x", "y")).await,
            AuthOutcome::Rejected
        ));
    }

    #[test]
    fn require_without_cookie() {
        let gate = gate();
        assert!(matches!(
            gate.require(None),
            Err(Error::AuthenticationRequired)
        ));
    }

    #[test]
    fn require_unauthenticated_session() {
        let gate = gate();
        let s = gate.sessions().create_session();
        assert!(matches!(
            gate.require(Some(&s.id)),
            Err(Error::AuthenticationRequired)
        ));
    }

    #[tokio::test]
    async fn logout_destroys_session() {
        let gate = gate();
        let AuthOutcome::Accepted(session) = gate
            .authenticate(None, &Credentials::new("admin", "secret"))
            .await
        else {
            panic!("expected acceptance");
        };
        assert!(gate.require(Some(&session.id)).is_ok());
        assert!(gate.logout(&session.id));
        assert!(!gate.logout(&session.id));
        assert!(gate.require(Some(&session.id)).is_err());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("admin", "hunter2");
        let text = format!("{creds:?}");
        assert!(text.contains("admin"));
        assert!(!text.contains("hunter2"));
    }
}
