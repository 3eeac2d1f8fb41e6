//! Named RPC methods and call dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::Value;
use stratus_core::Session;
use tracing::{debug, error, warn};

use crate::context::CallContext;
use crate::errors::{RegistryError, RpcError};
use crate::params::{self, Args, ParamSpec};
use crate::types::{RpcCall, RpcResponse};

/// Default upper bound on a single handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

/// An RPC method implementation.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Run the method with validated arguments and the caller's session.
    async fn call(
        &self,
        args: Args,
        session: Session,
        ctx: &CallContext,
    ) -> Result<Value, RpcError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Args, Session, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    async fn call(
        &self,
        args: Args,
        session: Session,
        ctx: &CallContext,
    ) -> Result<Value, RpcError> {
        (self.0)(args, session, ctx.clone()).await
    }
}

/// Wrap an async closure as a [`MethodHandler`].
pub fn from_fn<F, Fut>(f: F) -> impl MethodHandler
where
    F: Fn(Args, Session, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    FnHandler(f)
}

struct Registration {
    params: Vec<ParamSpec>,
    handler: Arc<dyn MethodHandler>,
}

/// Registry mapping method names to handlers and their declared parameters.
///
/// Populated before the server starts; the server takes ownership and only
/// reads from it afterwards.
pub struct MethodRegistry {
    methods: HashMap<String, Registration>,
    handler_timeout: Duration,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Set the per-call handler timeout.
    pub fn set_handler_timeout(&mut self, timeout: Duration) {
        self.handler_timeout = timeout;
    }

    /// Current per-call handler timeout.
    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// Register a handler under `name` with its declared parameters.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        handler: impl MethodHandler + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(RegistryError::DuplicateMethod(name));
        }
        debug!(method = %name, params = params.len(), "rpc method registered");
        let _ = self.methods.insert(
            name,
            Registration {
                params,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Dispatch a call. Always produces exactly one response carrying the call's id.
    pub async fn dispatch(&self, call: RpcCall, ctx: &CallContext) -> RpcResponse {
        let RpcCall { id, method, args } = call;
        counter!("rpc_requests_total", "method" => method.clone()).increment(1);
        let start = Instant::now();

        let response = match self.invoke(&method, args, ctx).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(err) => {
                counter!(
                    "rpc_errors_total",
                    "method" => method.clone(),
                    "error_type" => err.kind().as_str()
                )
                .increment(1);
                debug!(method, kind = err.kind().as_str(), error = %err, "rpc call failed");
                RpcResponse::failure(id, &err)
            }
        };

        let duration = start.elapsed();
        histogram!("rpc_request_duration_seconds", "method" => method.clone())
            .record(duration.as_secs_f64());
        if duration.as_secs() >= 5 {
            warn!(
                method,
                duration_secs = duration.as_secs_f64(),
                "slow RPC request"
            );
        }
        response
    }

    async fn invoke(&self, method: &str, args: Value, ctx: &CallContext) -> Result<Value, RpcError> {
        let registration = self
            .methods
            .get(method)
            .ok_or_else(|| RpcError::MethodNotFound(method.to_owned()))?;
        let args = params::validate(&registration.params, args)?;
        let session = ctx.session()?;

        let guarded = AssertUnwindSafe(registration.handler.call(args, session, ctx)).catch_unwind();
        match tokio::time::timeout(self.handler_timeout, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let reason = panic_message(panic.as_ref());
                error!(method, reason, "rpc handler panicked");
                Err(RpcError::handler(format!("handler for '{method}' panicked")))
            }
            Err(_elapsed) => {
                error!(method, "rpc handler timed out after {:?}", self.handler_timeout);
                Err(RpcError::handler(format!("handler for '{method}' timed out")))
            }
        }
    }

    /// Declared parameters of a method.
    pub fn params(&self, method: &str) -> Option<&[ParamSpec]> {
        self.methods.get(method).map(|r| r.params.as_slice())
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `method` is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
