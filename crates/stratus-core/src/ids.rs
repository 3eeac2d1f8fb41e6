//! Branded identifiers for sessions and connections.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of random bytes in a session token.
const SESSION_TOKEN_BYTES: usize = 32;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string (e.g. read from a cookie).
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Opaque session token carried by the session cookie.
    SessionId
);
branded_id!(
    /// Identifier of one live websocket connection.
    ConnectionId
);

impl SessionId {
    /// Generate a fresh unguessable token (256 bits, base64url).
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_TOKEN_BYTES];
        rand::rng().fill(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Short prefix safe to put in logs.
    pub fn redacted(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl ConnectionId {
    /// Generate a time-ordered connection id (`conn_<uuid v7>`).
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}
