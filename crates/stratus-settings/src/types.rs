//! Settings schema with compiled defaults.
//!
//! Every struct uses `#[serde(default)]`, so a settings file only needs the
//! keys it overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StratusSettings {
    /// Settings schema version.
    pub version: String,
    /// Server identity, logged at startup.
    pub name: String,
    /// Listener and protocol settings.
    pub server: ServerSettings,
    /// Session cookie and expiry settings.
    pub session: SessionSettings,
    /// Built-in credential table.
    pub auth: AuthSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl Default for StratusSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "stratus".to_string(),
            server: ServerSettings::default(),
            session: SessionSettings::default(),
            auth: AuthSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl StratusSettings {
    /// Reject values the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        for (key, path) in [
            ("server.wsPath", &self.server.ws_path),
            ("server.rpcPath", &self.server.rpc_path),
            ("server.loginPath", &self.server.login_path),
        ] {
            if !path.starts_with('/') {
                return Err(SettingsError::invalid(
                    key,
                    format!("must start with '/', got '{path}'"),
                ));
            }
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::invalid(
                "server.sendQueueCapacity",
                "must be at least 1",
            ));
        }
        if self.server.handler_timeout_secs == 0 {
            return Err(SettingsError::invalid(
                "server.handlerTimeoutSecs",
                "must be at least 1",
            ));
        }
        if self.session.cookie_name.is_empty() {
            return Err(SettingsError::invalid(
                "session.cookieName",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

/// Listener and protocol settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Websocket upgrade path.
    pub ws_path: String,
    /// HTTP RPC endpoint path.
    pub rpc_path: String,
    /// Login form path.
    pub login_path: String,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
    /// Websocket ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Disconnect a client silent for this long, in seconds.
    pub pong_timeout_secs: u64,
    /// Upper bound on a single RPC handler, in seconds.
    pub handler_timeout_secs: u64,
    /// Run each RPC call of a connection on its own task.
    pub concurrent_dispatch: bool,
    /// Grace period for in-flight connections at shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            rpc_path: "/rpc".to_string(),
            login_path: "/login".to_string(),
            max_message_size: 1_048_576,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 90,
            handler_timeout_secs: 60,
            concurrent_dispatch: false,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Session cookie and expiry settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Name of the session cookie.
    pub cookie_name: String,
    /// Set the `Secure` attribute on the cookie.
    pub cookie_secure: bool,
    /// Expire sessions idle for this many seconds. `None` keeps them forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    /// How often expired sessions are swept, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "stratus_session".to_string(),
            cookie_secure: false,
            idle_timeout_secs: None,
            sweep_interval_secs: 60,
        }
    }
}

/// Built-in credential table (username → password).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Accepted users.
    pub users: BTreeMap<String, String>,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
