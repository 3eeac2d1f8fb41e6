//! Demo application: a visit counter, an echo method and a chat relay.

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use serde_json::{Value, json};
use stratus_core::{BroadcastTarget, Session, USERNAME_KEY};
use stratus_rpc::{MethodRegistry, ParamKind, ParamSpec, RegistryError, RpcError, from_fn};
use stratus_server::{AppState, ConnectionContext, ConnectionHandler, CurrentSession};
use tracing::{debug, info};

const VISIT_COUNT_KEY: &str = "visit_count";

/// Register the demo RPC methods.
pub fn register_methods(methods: &mut MethodRegistry) -> Result<(), RegistryError> {
    methods.register(
        "echo",
        vec![ParamSpec::required("msg")],
        from_fn(|args, _session, _ctx| async move {
            Ok::<_, RpcError>(args.get("msg").cloned().unwrap_or(Value::Null))
        }),
    )?;

    methods.register(
        "hello",
        vec![
            ParamSpec::required("msg").of(ParamKind::String),
            ParamSpec::required("n").of(ParamKind::Integer),
            ParamSpec::optional("debug", false).of(ParamKind::Bool),
        ],
        from_fn(|args, _session, ctx| async move {
            let msg = args.get_str("msg").unwrap_or_default().to_string();
            let n = args.get_i64("n").unwrap_or_default();
            if args.get_bool("debug").unwrap_or(false) {
                debug!(msg = %msg, n, "hello called");
            }
            let visit_count = ctx.update_session(|data| {
                let next = data.get_i64(VISIT_COUNT_KEY).unwrap_or(0) + 1;
                let _ = data.insert(VISIT_COUNT_KEY, next);
                next
            })?;
            let _ = ctx.broadcast(&msg, &BroadcastTarget::All);
            Ok::<_, RpcError>(json!({ "status": "ok", "visit_count": visit_count }))
        }),
    )?;

    methods.register(
        "whoami",
        vec![],
        from_fn(|_args, session: Session, _ctx| async move {
            Ok::<_, RpcError>(json!({
                "username": session.data.get_str(USERNAME_KEY),
                "visit_count": session.data.get_i64(VISIT_COUNT_KEY).unwrap_or(0),
            }))
        }),
    )?;

    Ok(())
}

/// Relays every plain message to all connected clients.
#[derive(Debug, Default)]
pub struct ChatRelay;

#[async_trait]
impl ConnectionHandler for ChatRelay {
    async fn on_connect(&self, ctx: &ConnectionContext, session: &Session) {
        info!(
            conn_id = %ctx.id(),
            username = session.data.get_str(USERNAME_KEY).unwrap_or("?"),
            "client joined"
        );
    }

    async fn on_message(&self, ctx: &ConnectionContext, session: Session, message: String) {
        let from = session.data.get_str(USERNAME_KEY).unwrap_or("anonymous");
        let payload = json!({ "from": from, "text": message }).to_string();
        let _ = ctx.broadcast(&payload, &BroadcastTarget::All);
    }

    async fn on_disconnect(&self, ctx: &ConnectionContext) {
        info!(conn_id = %ctx.id(), "client left");
    }
}

/// `GET /`: greet the user and bump their visit counter.
async fn index(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Html<String> {
    let visits = state
        .sessions
        .update(&session.id, |data| {
            let next = data.get_i64(VISIT_COUNT_KEY).unwrap_or(0) + 1;
            let _ = data.insert(VISIT_COUNT_KEY, next);
            next
        })
        .unwrap_or(0);
    let name = session.data.get_str(USERNAME_KEY).unwrap_or("anonymous");
    Html(format!(
        "<!DOCTYPE HTML><html><body><p>Hello {}, visit {visits}.</p>\
         <form method=\"post\" action=\"{}\"><input type=\"submit\" value=\"Logout\"></form>\
         </body></html>",
        escape(name),
        state.config.logout_path,
    ))
}

fn escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Routes that require a logged-in session.
pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/", get(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stratus_core::{ConnectionRegistry, SessionStore};
    use stratus_rpc::{CallContext, RpcCall};

    fn context() -> CallContext {
        let sessions = Arc::new(SessionStore::new());
        let connections = Arc::new(ConnectionRegistry::new(Arc::clone(&sessions)));
        let session = sessions.create_session();
        let _ = sessions.set_authenticated(&session.id, true).unwrap();
        let _ = sessions
            .update(&session.id, |d| d.insert(USERNAME_KEY, "alice"))
            .unwrap();
        CallContext::new(session.id, sessions, connections)
    }

    fn registry() -> MethodRegistry {
        let mut methods = MethodRegistry::new();
        register_methods(&mut methods).unwrap();
        methods
    }

    #[test]
    fn registers_demo_methods() {
        assert_eq!(registry().methods(), vec!["echo", "hello", "whoami"]);
    }

    #[test]
    fn registering_twice_fails() {
        let mut methods = registry();
        assert!(register_methods(&mut methods).is_err());
    }

    #[tokio::test]
    async fn hello_counts_visits() {
        let methods = registry();
        let ctx = context();
        for expected in 1..=2 {
            let call = RpcCall::new("h", "hello", json!({"msg": "hi", "n": 3}));
            let resp = methods.dispatch(call, &ctx).await;
            assert_eq!(
                resp.result,
                Some(json!({"status": "ok", "visit_count": expected}))
            );
        }
    }

    #[tokio::test]
    async fn hello_rejects_wrong_types() {
        let methods = registry();
        let call = RpcCall::new("h", "hello", json!({"msg": "hi", "n": "three"}));
        let resp = methods.dispatch(call, &context()).await;
        assert_eq!(resp.error_kind(), Some("InvalidParams"));
    }

    #[tokio::test]
    async fn whoami_reports_username() {
        let methods = registry();
        let call = RpcCall::new(1_i64, "whoami", Value::Null);
        let resp = methods.dispatch(call, &context()).await;
        assert_eq!(
            resp.result,
            Some(json!({"username": "alice", "visit_count": 0}))
        );
    }

    #[test]
    fn escape_html() {
        assert_eq!(escape("<a&\"b>"), "&lt;a&amp;&quot;b&gt;");
    }
}
