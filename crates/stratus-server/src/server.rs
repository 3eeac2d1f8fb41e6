//! `StratusServer`: Axum HTTP + websocket server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use stratus_core::{
    AuthGate, Authenticator, ConnectionRegistry, Credentials, IdleTimeout, SessionStore,
};
use stratus_rpc::MethodRegistry;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::health::HealthReport;
use crate::hooks::{Hooks, LifecycleHook};
use crate::metrics::{self as server_metrics, SESSIONS_EXPIRED_TOTAL};
use crate::rpc_http;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{self, callbacks::ConnectionHandler, callbacks::NoopHandler};

/// Shared state handed to every route, hook and connection.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Session store.
    pub sessions: Arc<SessionStore>,
    /// Credential check and session authentication.
    pub auth: Arc<AuthGate>,
    /// Live websocket connections.
    pub connections: Arc<ConnectionRegistry>,
    /// RPC methods, frozen once the server is built.
    pub methods: Arc<MethodRegistry>,
    /// Application connection callbacks.
    pub handler: Arc<dyn ConnectionHandler>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// When the server was built.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    #[cfg(test)]
    pub(crate) fn for_tests(config: ServerConfig) -> Self {
        StratusServer::builder(config).build().state
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .field("connections", &self.connections.connection_count())
            .field("methods", &self.methods.methods())
            .finish_non_exhaustive()
    }
}

fn session_store_for(config: &ServerConfig) -> SessionStore {
    match config.idle_timeout() {
        Some(idle) => SessionStore::with_policy(IdleTimeout(idle)),
        None => SessionStore::new(),
    }
}

/// Collects everything the server needs before it starts.
///
/// Methods, callbacks and hooks can only be supplied here; once
/// [`build`](Self::build) runs they are owned by the server.
pub struct ServerBuilder {
    config: ServerConfig,
    sessions: Arc<SessionStore>,
    auth: Option<AuthGate>,
    methods: MethodRegistry,
    handler: Arc<dyn ConnectionHandler>,
    hooks: Hooks,
    protected: Option<Router<AppState>>,
    public: Router<AppState>,
    metrics: Option<PrometheusHandle>,
}

impl ServerBuilder {
    fn new(config: ServerConfig) -> Self {
        let sessions = Arc::new(session_store_for(&config));
        Self {
            config,
            sessions,
            auth: None,
            methods: MethodRegistry::new(),
            handler: Arc::new(NoopHandler),
            hooks: Hooks::default(),
            protected: None,
            public: Router::new(),
            metrics: None,
        }
    }

    /// Credential check used by the login route. Without one every login
    /// is rejected.
    #[must_use]
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.auth = Some(AuthGate::new(Arc::clone(&self.sessions), authenticator));
        self
    }

    /// RPC methods served over websocket and HTTP.
    #[must_use]
    pub fn methods(mut self, methods: MethodRegistry) -> Self {
        self.methods = methods;
        self
    }

    /// Connect, message and disconnect callbacks.
    #[must_use]
    pub fn connection_handler(mut self, handler: impl ConnectionHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Hook run before the listener accepts connections.
    #[must_use]
    pub fn on_startup(mut self, hook: impl LifecycleHook + 'static) -> Self {
        self.hooks.add_startup(hook);
        self
    }

    /// Hook run after the listener has stopped.
    #[must_use]
    pub fn on_shutdown(mut self, hook: impl LifecycleHook + 'static) -> Self {
        self.hooks.add_shutdown(hook);
        self
    }

    /// Routes that require an authenticated session.
    #[must_use]
    pub fn routes(mut self, routes: Router<AppState>) -> Self {
        self.protected = Some(match self.protected.take() {
            Some(existing) => existing.merge(routes),
            None => routes,
        });
        self
    }

    /// Routes open to everyone.
    #[must_use]
    pub fn public_routes(mut self, routes: Router<AppState>) -> Self {
        self.public = self.public.merge(routes);
        self
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Freeze the configuration into a server.
    pub fn build(self) -> StratusServer {
        let mut methods = self.methods;
        methods.set_handler_timeout(self.config.handler_timeout());

        let auth = self.auth.unwrap_or_else(|| {
            warn!("no authenticator configured, every login will be rejected");
            AuthGate::new(Arc::clone(&self.sessions), |_: &Credentials| false)
        });

        let state = AppState {
            connections: Arc::new(ConnectionRegistry::new(Arc::clone(&self.sessions))),
            config: Arc::new(self.config),
            sessions: self.sessions,
            auth: Arc::new(auth),
            methods: Arc::new(methods),
            handler: self.handler,
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            metrics: self.metrics,
        };

        StratusServer {
            state,
            hooks: self.hooks,
            protected: self.protected,
            public: self.public,
        }
    }
}

/// The Stratus server.
pub struct StratusServer {
    state: AppState,
    hooks: Hooks,
    protected: Option<Router<AppState>>,
    public: Router<AppState>,
}

impl StratusServer {
    /// Start configuring a server.
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// Shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Build the Axum router with every route.
    pub fn router(&self) -> Router {
        let cfg = &self.state.config;
        let mut app: Router<AppState> = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(
                &cfg.login_path,
                get(auth::login_form).post(auth::login_submit),
            )
            .route(&cfg.logout_path, post(auth::logout))
            .route(&cfg.ws_path, get(websocket::ws_upgrade))
            .route(
                &cfg.rpc_path,
                post(rpc_http::rpc_endpoint).layer(DefaultBodyLimit::max(cfg.max_message_size)),
            )
            .merge(self.public.clone());

        if let Some(protected) = &self.protected {
            let guard = middleware::from_fn_with_state(self.state.clone(), auth::require_auth);
            app = app.merge(protected.clone().route_layer(guard));
        }

        app.layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run startup hooks, bind, and start serving in the background.
    pub async fn listen(self) -> Result<ServerHandle> {
        let state = self.state.clone();
        self.hooks.run_startup(&state).await?;

        let addr = state.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let app = self.router();
        let token = state.shutdown.token();
        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(error) = result {
                error!(%error, "server stopped with an error");
            }
        });
        let mut tasks = vec![serve];

        if state.config.idle_timeout().is_some() {
            tasks.push(tokio::spawn(sweep_sessions(
                Arc::clone(&state.sessions),
                state.config.sweep_interval(),
                state.shutdown.token(),
            )));
        }

        info!(
            %local_addr,
            ws_path = %state.config.ws_path,
            rpc_path = %state.config.rpc_path,
            methods = state.methods.len(),
            "stratus server listening"
        );

        Ok(ServerHandle {
            local_addr,
            state,
            hooks: self.hooks,
            tasks,
        })
    }

    /// Serve until `signal` resolves, then shut down gracefully.
    pub async fn run_until(self, signal: impl Future<Output = ()>) -> Result<()> {
        let handle = self.listen().await?;
        signal.await;
        handle.shutdown().await;
        Ok(())
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: AppState,
    hooks: Hooks,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop accepting, close every connection, then run shutdown hooks.
    pub async fn shutdown(self) {
        info!("shutting down");
        let timeout = self.state.config.shutdown_timeout();
        let closing = self.state.connections.close_all();
        debug!(closing, "closing websocket connections");

        self.state
            .shutdown
            .graceful_shutdown(self.tasks, timeout)
            .await;
        wait_for_drain(&self.state.connections, timeout).await;

        self.hooks.run_shutdown(&self.state).await;
        info!("shutdown complete");
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

async fn wait_for_drain(connections: &ConnectionRegistry, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while connections.connection_count() > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                remaining = connections.connection_count(),
                "connections still open after shutdown timeout"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn sweep_sessions(sessions: Arc<SessionStore>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = sessions.purge_expired();
                if removed > 0 {
                    counter!(SESSIONS_EXPIRED_TOTAL).increment(u64::try_from(removed).unwrap_or(u64::MAX));
                    debug!(removed, "expired sessions swept");
                }
            }
        }
    }
}

/// `GET /health`
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport::snapshot(&state))
}

/// `GET /metrics`
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            server_metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CurrentSession;
    use crate::hooks::HookError;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stratus_core::{SessionId, StaticUsers};
    use stratus_rpc::{ParamSpec, RpcError, from_fn};
    use tower::ServiceExt;

    fn users() -> StaticUsers {
        StaticUsers::new(HashMap::from([("alice".to_string(), "secret".to_string())]))
    }

    fn echo_methods() -> MethodRegistry {
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

    fn make_server() -> StratusServer {
        StratusServer::builder(ServerConfig::default())
            .authenticator(users())
            .methods(echo_methods())
            .routes(Router::new().route(
                "/app",
                get(|CurrentSession(session): CurrentSession| async move {
                    session.data.get_str("username").unwrap_or_default().to_string()
                }),
            ))
            .build()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn login_request(username: &str, password: &str, path: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "username={username}&password={password}&path={path}"
            )))
            .unwrap()
    }

    /// `name=value` of the first `Set-Cookie` header.
    fn cookie_pair(resp: &Response) -> String {
        let raw = resp.headers()[header::SET_COOKIE].to_str().unwrap();
        raw.split(';').next().unwrap().to_string()
    }

    async fn login(server: &StratusServer) -> String {
        let resp = server
            .router()
            .oneshot(login_request("alice", "secret", "%2Fapp"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        cookie_pair(&resp)
    }

    fn session_id_of(cookie: &str) -> SessionId {
        SessionId::from_raw(cookie.split_once('=').unwrap().1)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["rpc_methods"], 1);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn login_form_embeds_escaped_path() {
        let server = make_server();
        let req = Request::builder()
            .uri("/login?path=%2Fa%22b")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_text(resp).await;
        assert!(html.contains(r#"value="/a&quot;b""#));
    }

    #[tokio::test]
    async fn login_success_sets_cookie_and_redirects() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(login_request("alice", "secret", "%2Fapp"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/app");

        let raw = resp.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(raw.starts_with("stratus_session="));
        assert!(raw.contains("HttpOnly"));
        assert!(raw.contains("SameSite=Lax"));

        let session = server
            .state()
            .sessions
            .get_session(&session_id_of(&cookie_pair(&resp)))
            .unwrap();
        assert!(session.authenticated);
        assert_eq!(session.data.get_str("username"), Some("alice"));
    }

    #[tokio::test]
    async fn login_rejects_foreign_redirect() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(login_request("alice", "secret", "https%3A%2F%2Fevil.example"))
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn login_failure_redirects_to_login() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(login_request("alice", "wrong", "%2Fapp"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/login");
        assert!(server.state().sessions.is_empty());
    }

    #[tokio::test]
    async fn protected_route_redirects_with_original_path() {
        let server = make_server();
        let req = Request::builder().uri("/app?x=1").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers()[header::LOCATION],
            "/login?path=%2Fapp%3Fx%3D1"
        );
    }

    #[tokio::test]
    async fn protected_route_json_client_gets_401() {
        let server = make_server();
        let req = Request::builder()
            .uri("/app")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["error"]["kind"], "AuthenticationRequired");
    }

    #[tokio::test]
    async fn protected_route_sees_current_session() {
        let server = make_server();
        let cookie = login(&server).await;
        let req = Request::builder()
            .uri("/app")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "alice");
    }

    #[tokio::test]
    async fn rpc_over_http_round_trip() {
        let server = make_server();
        let cookie = login(&server).await;
        let req = Request::builder()
            .method("POST")
            .uri("/rpc")
            .header(header::COOKIE, &cookie)
            .body(Body::from(
                json!({"id": "1", "method": "echo", "args": {"msg": "hi"}}).to_string(),
            ))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"id": "1", "result": "hi"}));
    }

    #[tokio::test]
    async fn rpc_over_http_requires_session() {
        let server = make_server();
        let req = Request::builder()
            .method("POST")
            .uri("/rpc")
            .body(Body::from(r#"{"id":"1","method":"echo","args":{"msg":"hi"}}"#))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(resp).await["error"]["kind"],
            "AuthenticationRequired"
        );
    }

    #[tokio::test]
    async fn rpc_over_http_rejects_non_call_body() {
        let server = make_server();
        let cookie = login(&server).await;
        let req = Request::builder()
            .method("POST")
            .uri("/rpc")
            .header(header::COOKIE, &cookie)
            .body(Body::from(r#"{"hello":"world"}"#))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        let parsed = body_json(resp).await;
        assert_eq!(parsed["id"], Value::Null);
        assert_eq!(parsed["error"]["kind"], "InvalidParams");
    }

    #[tokio::test]
    async fn logout_destroys_session() {
        let server = make_server();
        let cookie = login(&server).await;
        let req = Request::builder()
            .method("POST")
            .uri("/logout")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/login");
        assert!(!server.state().sessions.contains(&session_id_of(&cookie)));
    }

    #[tokio::test]
    async fn websocket_route_requires_upgrade() {
        let server = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn handler_timeout_comes_from_config() {
        let config = ServerConfig {
            handler_timeout_secs: 7,
            ..ServerConfig::default()
        };
        let server = StratusServer::builder(config).build();
        assert_eq!(
            server.state().methods.handler_timeout(),
            Duration::from_secs(7)
        );
    }

    #[tokio::test]
    async fn without_authenticator_login_is_rejected() {
        let server = StratusServer::builder(ServerConfig::default()).build();
        let resp = server
            .router()
            .oneshot(login_request("alice", "secret", "%2F"))
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn listen_runs_hooks_around_lifetime() {
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let (s, t) = (Arc::clone(&started), Arc::clone(&stopped));

        let server = StratusServer::builder(ServerConfig::default())
            .on_startup(move |_state: AppState| {
                let s = Arc::clone(&s);
                async move {
                    let _ = s.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), HookError>(())
                }
            })
            .on_shutdown(move |_state: AppState| {
                let t = Arc::clone(&t);
                async move {
                    let _ = t.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), HookError>(())
                }
            })
            .build();

        let handle = server.listen().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(stopped.load(Ordering::SeqCst), 0);

        let state = handle.state().clone();
        handle.shutdown().await;
        assert!(state.shutdown.is_shutting_down());
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_startup_hook_aborts_listen() {
        let server = StratusServer::builder(ServerConfig::default())
            .on_startup(|_state: AppState| async { Err::<(), _>(HookError::new("db unreachable")) })
            .build();
        let err = server.listen().await.unwrap_err();
        assert!(matches!(err, ServerError::StartupHook(_)));
    }

    #[tokio::test]
    async fn sweeper_purges_idle_sessions() {
        let sessions = Arc::new(SessionStore::with_policy(IdleTimeout(Duration::from_millis(5))));
        let _ = sessions.create_session();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweep_sessions(
            Arc::clone(&sessions),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sessions.is_empty());
        cancel.cancel();
        task.await.unwrap();
    }
}
