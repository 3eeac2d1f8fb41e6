//! Per-frame routing: RPC calls go to the method registry, anything else to
//! the application's message callback.

use std::sync::Arc;

use stratus_core::ClientConnection;
use stratus_rpc::{CallContext, Inbound, MethodRegistry, RpcError, RpcResponse, classify};
use tracing::{debug, instrument, warn};

use super::callbacks::{ConnectionContext, ConnectionHandler};

/// What happened to a routed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Dispatched as an RPC call (possibly still running when concurrent).
    Call(String),
    /// Looked like a call but the envelope was broken; an error was sent.
    Malformed,
    /// Handed to `on_message`.
    Message,
    /// The owning session is gone; the connection was asked to close.
    SessionGone,
}

/// Everything a connection needs to route its frames.
#[derive(Clone)]
pub struct FrameRouter {
    methods: Arc<MethodRegistry>,
    handler: Arc<dyn ConnectionHandler>,
    concurrent: bool,
}

impl FrameRouter {
    /// Build a router. With `concurrent` set each call runs on its own task.
    pub fn new(
        methods: Arc<MethodRegistry>,
        handler: Arc<dyn ConnectionHandler>,
        concurrent: bool,
    ) -> Self {
        Self {
            methods,
            handler,
            concurrent,
        }
    }

    /// Route one text payload received on `ctx`'s connection.
    #[instrument(skip_all, fields(conn_id = %ctx.id()))]
    pub async fn route(&self, ctx: &ConnectionContext, text: String) -> Routed {
        match classify(&text) {
            Inbound::Call(call) => {
                let method = call.method.clone();
                debug!(method, id = %call.id, "dispatching RPC");
                let call_ctx = CallContext::new(
                    ctx.session_id().clone(),
                    Arc::clone(ctx.sessions()),
                    Arc::clone(ctx.connections()),
                )
                .with_connection(ctx.id().clone());

                if self.concurrent {
                    let methods = Arc::clone(&self.methods);
                    let connection = Arc::clone(ctx.connection());
                    let _ = tokio::spawn(async move {
                        let response = methods.dispatch(call, &call_ctx).await;
                        send_response(&connection, &response);
                    });
                } else {
                    let response = self.methods.dispatch(call, &call_ctx).await;
                    send_response(ctx.connection(), &response);
                }
                Routed::Call(method)
            }
            Inbound::Malformed { id, message } => {
                warn!(%id, message, "malformed RPC envelope");
                let response = RpcResponse::failure(id, &RpcError::invalid_params(message));
                send_response(ctx.connection(), &response);
                Routed::Malformed
            }
            Inbound::Plain => match ctx.session() {
                Ok(session) => {
                    let _ = ctx.sessions().touch(ctx.session_id());
                    self.handler.on_message(ctx, session, text).await;
                    Routed::Message
                }
                Err(error) => {
                    warn!(%error, "session gone, closing connection");
                    ctx.close();
                    Routed::SessionGone
                }
            },
        }
    }
}

impl std::fmt::Debug for FrameRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRouter")
            .field("methods", &self.methods.len())
            .field("concurrent", &self.concurrent)
            .finish_non_exhaustive()
    }
}

fn send_response(connection: &ClientConnection, response: &RpcResponse) {
    if let Err(error) = connection.send(response.to_json_string()) {
        warn!(conn_id = %connection.id(), %error, "failed to enqueue RPC response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use stratus_core::{ConnectionId, ConnectionRegistry, Session, SessionStore};
    use stratus_rpc::{ParamSpec, from_fn};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConnectionHandler for Recorder {
        async fn on_message(&self, _ctx: &ConnectionContext, _session: Session, message: String) {
            self.messages.lock().push(message);
        }
    }

    fn echo_registry() -> MethodRegistry {
        let mut methods = MethodRegistry::new();
        methods
            .register(
                "echo",
                vec![ParamSpec::required("msg")],
                from_fn(|args, _session, _ctx| async move {
                    Ok::<_, RpcError>(args.get("msg").cloned().unwrap_or(Value::Null))
                }),
            )
            .unwrap();
        methods
    }

    fn setup(
        concurrent: bool,
    ) -> (FrameRouter, ConnectionContext, mpsc::Receiver<String>, Arc<Recorder>) {
        let sessions = Arc::new(SessionStore::new());
        let connections = Arc::new(ConnectionRegistry::new(Arc::clone(&sessions)));
        let session = sessions.create_session();
        let _ = sessions.set_authenticated(&session.id, true).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(ClientConnection::new(ConnectionId::generate(), session.id, tx));
        connections.register(Arc::clone(&conn)).unwrap();

        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn ConnectionHandler> = recorder.clone();
        let router = FrameRouter::new(Arc::new(echo_registry()), handler, concurrent);
        (router, ConnectionContext::new(conn, sessions, connections), rx, recorder)
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn call_gets_response_on_same_connection() {
        let (router, ctx, mut rx, recorder) = setup(false);
        let frame = json!({"id": "1", "method": "echo", "args": {"msg": "hi"}}).to_string();

        assert_eq!(router.route(&ctx, frame).await, Routed::Call("echo".into()));
        let reply = parse(&rx.recv().await.unwrap());
        assert_eq!(reply, json!({"id": "1", "result": "hi"}));
        assert!(recorder.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_method_reports_error() {
        let (router, ctx, mut rx, _) = setup(false);
        let frame = json!({"id": 7, "method": "missing", "args": {}}).to_string();

        let _ = router.route(&ctx, frame).await;
        let reply = parse(&rx.recv().await.unwrap());
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["error"]["kind"], "MethodNotFound");
    }

    #[tokio::test]
    async fn concurrent_call_still_replies() {
        let (router, ctx, mut rx, _) = setup(true);
        let frame = json!({"id": "c", "method": "echo", "args": {"msg": 3}}).to_string();

        let _ = router.route(&ctx, frame).await;
        let reply = parse(&rx.recv().await.unwrap());
        assert_eq!(reply, json!({"id": "c", "result": 3}));
    }

    #[tokio::test]
    async fn malformed_envelope_gets_invalid_params() {
        let (router, ctx, mut rx, recorder) = setup(false);
        let frame = json!({"id": "m", "method": "echo", "args": {}, "params": {}}).to_string();

        assert_eq!(router.route(&ctx, frame).await, Routed::Malformed);
        let reply = parse(&rx.recv().await.unwrap());
        assert_eq!(reply["id"], "m");
        assert_eq!(reply["error"]["kind"], "InvalidParams");
        assert!(recorder.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn non_object_args_get_invalid_params() {
        let (router, ctx, mut rx, _) = setup(false);
        let frame = json!({"id": "a", "method": "echo", "args": [1, 2]}).to_string();

        assert_eq!(router.route(&ctx, frame).await, Routed::Call("echo".into()));
        let reply = parse(&rx.recv().await.unwrap());
        assert_eq!(reply["error"]["kind"], "InvalidParams");
    }

    #[tokio::test]
    async fn plain_text_goes_to_callback() {
        let (router, ctx, mut rx, recorder) = setup(false);

        assert_eq!(router.route(&ctx, "hello".into()).await, Routed::Message);
        assert_eq!(
            router.route(&ctx, r#"{"type":"chat"}"#.into()).await,
            Routed::Message
        );
        assert_eq!(*recorder.messages.lock(), vec!["hello", r#"{"type":"chat"}"#]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn plain_message_on_destroyed_session_closes() {
        let (router, ctx, _rx, recorder) = setup(false);
        let _ = ctx.sessions().destroy_session(ctx.session_id());

        assert_eq!(router.route(&ctx, "hello".into()).await, Routed::SessionGone);
        assert!(!ctx.connection().is_open());
        assert!(recorder.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn call_on_destroyed_session_reports_session_not_found() {
        let (router, ctx, mut rx, _) = setup(false);
        let _ = ctx.sessions().destroy_session(ctx.session_id());
        let frame = json!({"id": "s", "method": "echo", "args": {"msg": "x"}}).to_string();

        let _ = router.route(&ctx, frame).await;
        let reply = parse(&rx.recv().await.unwrap());
        assert_eq!(reply["error"]["kind"], "SessionNotFound");
    }
}
