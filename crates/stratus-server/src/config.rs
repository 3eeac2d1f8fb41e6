//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratus_settings::StratusSettings;

/// Login page served at the login path. `{path}` is replaced with the
/// (HTML-escaped) return path.
pub const DEFAULT_LOGIN_PAGE: &str = r#"<!DOCTYPE HTML>
<html>
  <body>
    <form method="post">
      User name:<br/>
        <input type="text" name="username"><br/>
      User password:<br/>
        <input type="password" name="password"><br/>
        <input type="hidden" name="path" value="{path}">
        <input type="submit" value="Login"><br/>
    </form>
  </body>
</html>
"#;

/// Configuration for the Stratus server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Websocket upgrade path.
    pub ws_path: String,
    /// HTTP RPC endpoint path.
    pub rpc_path: String,
    /// Login form / credential submission path.
    pub login_path: String,
    /// Logout path.
    pub logout_path: String,
    /// Max inbound websocket message size and RPC body size, in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
    /// Heartbeat ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Disconnect a client silent for this long, in seconds.
    pub pong_timeout_secs: u64,
    /// Upper bound on a single RPC handler, in seconds.
    pub handler_timeout_secs: u64,
    /// Spawn each RPC call of a connection on its own task.
    pub concurrent_dispatch: bool,
    /// How long shutdown waits for the listener to drain, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Session cookie name.
    pub cookie_name: String,
    /// Set `Secure` on the session cookie.
    pub cookie_secure: bool,
    /// Expire sessions idle this long, in seconds. `None` disables expiry.
    pub idle_timeout_secs: Option<u64>,
    /// Expired-session sweep interval in seconds.
    pub sweep_interval_secs: u64,
    /// Login page template.
    pub login_page: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws".into(),
            rpc_path: "/rpc".into(),
            login_path: "/login".into(),
            logout_path: "/logout".into(),
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 90,
            handler_timeout_secs: 60,
            concurrent_dispatch: false,
            shutdown_timeout_secs: 10,
            cookie_name: "stratus_session".into(),
            cookie_secure: false,
            idle_timeout_secs: None,
            sweep_interval_secs: 60,
            login_page: DEFAULT_LOGIN_PAGE.into(),
        }
    }
}

impl ServerConfig {
    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Pong timeout.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Per-call handler timeout.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs.max(1))
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Idle expiry, if enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Expired-session sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl From<&StratusSettings> for ServerConfig {
    fn from(settings: &StratusSettings) -> Self {
        let server = &settings.server;
        let session = &settings.session;
        Self {
            host: server.host.clone(),
            port: server.port,
            ws_path: server.ws_path.clone(),
            rpc_path: server.rpc_path.clone(),
            login_path: server.login_path.clone(),
            max_message_size: server.max_message_size,
            send_queue_capacity: server.send_queue_capacity,
            heartbeat_interval_secs: server.heartbeat_interval_secs,
            pong_timeout_secs: server.pong_timeout_secs,
            handler_timeout_secs: server.handler_timeout_secs,
            concurrent_dispatch: server.concurrent_dispatch,
            shutdown_timeout_secs: server.shutdown_timeout_secs,
            cookie_name: session.cookie_name.clone(),
            cookie_secure: session.cookie_secure,
            idle_timeout_secs: session.idle_timeout_secs,
            sweep_interval_secs: session.sweep_interval_secs,
            ..Self::default()
        }
    }
}
