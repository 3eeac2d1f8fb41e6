//! Websocket upgrade, per-connection loop and frame routing.

pub mod callbacks;
pub mod handler;
pub mod session;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use stratus_core::ConnectionId;
use tracing::info;

use crate::auth::session_id_from_jar;
use crate::server::AppState;

/// `GET <ws_path>`: upgrade a cookie-authenticated request.
///
/// Requests without an authenticated session are still upgraded, sent
/// [`session::UNAUTHORIZED_FRAME`] and closed without being registered.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let session_id = session_id_from_jar(&jar, &state.config.cookie_name);
    let ws = ws.max_message_size(state.config.max_message_size);

    match state.auth.require(session_id.as_ref()) {
        Ok(session) => {
            let connection_id = ConnectionId::generate();
            ws.on_upgrade(move |socket| {
                session::run_ws_session(socket, connection_id, session, state)
            })
        }
        Err(error) => {
            info!(%error, "rejecting unauthenticated websocket");
            ws.on_upgrade(session::reject_unauthenticated)
        }
    }
}
