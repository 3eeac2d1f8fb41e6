//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::{Result, ServerError};

/// Install the global Prometheus recorder.
///
/// Call once at startup, before any metric is recorded. Fails if another
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("metrics exporter ready");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// RPC calls dispatched (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// RPC calls that failed (counter, labels: method, error_type).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// RPC call duration (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "rpc_request_duration_seconds";
/// Websocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Websocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open websocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Broadcast deliveries that failed (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Successful logins (counter).
pub const AUTH_LOGINS_TOTAL: &str = "auth_logins_total";
/// Rejected logins (counter).
pub const AUTH_REJECTIONS_TOTAL: &str = "auth_rejections_total";
/// Sessions removed by the expiry sweeper (counter).
pub const SESSIONS_EXPIRED_TOTAL: &str = "sessions_expired_total";
