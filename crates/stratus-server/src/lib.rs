//! # stratus-server
//!
//! Axum HTTP + `WebSocket` server binding cookie sessions to live
//! connections.
//!
//! - Login/logout routes and an auth guard for application routes
//! - `WebSocket` gateway: per-connection read loop, writer with heartbeat,
//!   frame routing between RPC dispatch and application callbacks
//! - RPC over HTTP at the configured path
//! - Startup/shutdown hooks and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod health;
pub mod hooks;
pub mod metrics;
pub mod rpc_http;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{CurrentSession, require_auth};
pub use config::ServerConfig;
pub use errors::{Result, ServerError};
pub use hooks::{HookError, HookResult, LifecycleHook};
pub use server::{AppState, ServerBuilder, ServerHandle, StratusServer};
pub use shutdown::ShutdownCoordinator;
pub use websocket::callbacks::{ConnectionContext, ConnectionHandler, NoopHandler};
