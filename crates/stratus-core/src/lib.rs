//! # stratus-core
//!
//! Session-bound connection state for the Stratus server.
//!
//! - **Session store**: [`SessionStore`] keeps per-client key-value data with
//!   per-session locking and pluggable expiry
//! - **Auth gate**: [`AuthGate`] checks credentials through an injected
//!   [`Authenticator`] and flips a session's authenticated flag
//! - **Connections**: [`ClientConnection`] wraps one websocket's outbound queue
//! - **Registry**: [`ConnectionRegistry`] indexes connections by id and session
//!   and fans messages out without blocking on slow clients

#![deny(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod registry;
pub mod session;

pub use auth::{AuthGate, AuthOutcome, Authenticator, Credentials, StaticUsers, USERNAME_KEY};
pub use connection::{ClientConnection, ConnectionState};
pub use errors::{Error, Result};
pub use ids::{ConnectionId, SessionId};
pub use registry::{BroadcastReport, BroadcastTarget, ConnectionRegistry, SessionPredicate};
pub use session::{ExpiryPolicy, IdleTimeout, NeverExpire, Session, SessionData, SessionStore};
