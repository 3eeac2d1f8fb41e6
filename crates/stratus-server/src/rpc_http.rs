//! `POST <rpc_path>`: the call envelope over plain HTTP.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::cookie::CookieJar;
use serde_json::Value;
use stratus_rpc::{CallContext, Inbound, RequestId, RpcError, RpcResponse, classify_value};
use tracing::debug;

use crate::auth::session_id_from_jar;
use crate::server::AppState;

/// Dispatch one call on behalf of the cookie session.
///
/// Every outcome other than a missing session is a `200` carrying an
/// [`RpcResponse`]. Bodies that are not a call envelope get
/// `InvalidParams` with a `null` id.
pub async fn rpc_endpoint(State(state): State<AppState>, jar: CookieJar, body: Bytes) -> Response {
    let session_id = session_id_from_jar(&jar, &state.config.cookie_name);
    let session = match state.auth.require(session_id.as_ref()) {
        Ok(session) => session,
        Err(error) => {
            debug!(%error, "unauthenticated RPC request");
            let response = RpcResponse::failure(RequestId::Null, &RpcError::AuthenticationRequired);
            return (StatusCode::UNAUTHORIZED, Json(response)).into_response();
        }
    };
    let _ = state.sessions.touch(&session.id);

    let response = match serde_json::from_slice::<Value>(&body) {
        Ok(value) => match classify_value(value) {
            Inbound::Call(call) => {
                let ctx = CallContext::new(
                    session.id,
                    Arc::clone(&state.sessions),
                    Arc::clone(&state.connections),
                );
                state.methods.dispatch(call, &ctx).await
            }
            Inbound::Malformed { id, message } => {
                RpcResponse::failure(id, &RpcError::invalid_params(message))
            }
            Inbound::Plain => RpcResponse::failure(
                RequestId::Null,
                &RpcError::invalid_params("body is not an RPC call"),
            ),
        },
        Err(e) => RpcResponse::failure(
            RequestId::Null,
            &RpcError::invalid_params(format!("invalid JSON: {e}")),
        ),
    };
    Json(response).into_response()
}
