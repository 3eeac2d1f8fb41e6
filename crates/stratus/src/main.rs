//! Stratus demo server.
//!
//! Serves a login page, a protected index page, websocket RPC at `/ws` and
//! HTTP RPC at `/rpc`. Users come from the `auth.users` table of the
//! settings file.

#![deny(unsafe_code)]

mod demo;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stratus_core::StaticUsers;
use stratus_rpc::MethodRegistry;
use stratus_server::{AppState, HookError, ServerConfig, StratusServer};
use stratus_settings::StratusSettings;
use tracing::{info, warn};

/// Stratus demo server.
#[derive(Parser, Debug)]
#[command(name = "stratus", about = "Session-bound websocket RPC server")]
struct Cli {
    /// Settings file (defaults to `~/.stratus/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host, overriding the settings file.
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overriding the settings file.
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, overriding the settings file.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, settings: &mut StratusSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .clone()
        .unwrap_or_else(stratus_settings::settings_path);
    let mut settings = stratus_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    stratus_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    info!(name = %settings.name, version = %settings.version, "starting");

    let users: HashMap<String, String> = settings.auth.users.clone().into_iter().collect();
    if users.is_empty() {
        warn!("no users configured under auth.users, every login will be rejected");
    }

    let mut methods = MethodRegistry::new();
    demo::register_methods(&mut methods).context("failed to register RPC methods")?;

    let mut builder = StratusServer::builder(ServerConfig::from(&settings))
        .authenticator(StaticUsers::new(users))
        .methods(methods)
        .connection_handler(demo::ChatRelay)
        .routes(demo::protected_routes())
        .on_startup(|state: AppState| async move {
            info!(methods = ?state.methods.methods(), "rpc methods ready");
            Ok::<(), HookError>(())
        })
        .on_shutdown(|state: AppState| async move {
            info!(
                sessions = state.sessions.len(),
                "shutting down"
            );
            Ok::<(), HookError>(())
        });

    match stratus_server::metrics::install_recorder() {
        Ok(handle) => builder = builder.metrics(handle),
        Err(e) => warn!(error = %e, "metrics disabled"),
    }

    builder
        .build()
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("server error")?;

    info!("stopped");
    Ok(())
}
