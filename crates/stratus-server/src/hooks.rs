//! Startup and shutdown hooks.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::server::AppState;

/// A lifecycle hook failed.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HookError(String);

impl HookError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result of a lifecycle hook.
pub type HookResult = Result<(), HookError>;

/// Code run once when the server starts or stops.
///
/// Closures `Fn(AppState) -> impl Future<Output = HookResult>` implement
/// this trait.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Run the hook against the shared server state.
    async fn run(&self, state: &AppState) -> HookResult;
}

#[async_trait]
impl<F, Fut> LifecycleHook for F
where
    F: Fn(AppState) -> Fut + Send + Sync,
    Fut: Future<Output = HookResult> + Send,
{
    async fn run(&self, state: &AppState) -> HookResult {
        (self)(state.clone()).await
    }
}

/// Hooks registered for each lifecycle phase.
#[derive(Clone, Default)]
pub struct Hooks {
    startup: Vec<Arc<dyn LifecycleHook>>,
    shutdown: Vec<Arc<dyn LifecycleHook>>,
}

impl Hooks {
    /// Append a startup hook.
    pub fn add_startup(&mut self, hook: impl LifecycleHook + 'static) {
        self.startup.push(Arc::new(hook));
    }

    /// Append a shutdown hook.
    pub fn add_shutdown(&mut self, hook: impl LifecycleHook + 'static) {
        self.shutdown.push(Arc::new(hook));
    }

    /// Run startup hooks in registration order, stopping at the first
    /// failure.
    pub async fn run_startup(&self, state: &AppState) -> HookResult {
        for (index, hook) in self.startup.iter().enumerate() {
            debug!(index, "running startup hook");
            hook.run(state).await?;
        }
        Ok(())
    }

    /// Run every shutdown hook in registration order. Failures are logged
    /// and do not stop later hooks.
    pub async fn run_shutdown(&self, state: &AppState) {
        for (index, hook) in self.shutdown.iter().enumerate() {
            debug!(index, "running shutdown hook");
            if let Err(error) = hook.run(state).await {
                warn!(index, %error, "shutdown hook failed");
            }
        }
    }

    /// Number of startup hooks.
    pub fn startup_len(&self) -> usize {
        self.startup.len()
    }

    /// Number of shutdown hooks.
    pub fn shutdown_len(&self) -> usize {
        self.shutdown.len()
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("startup", &self.startup.len())
            .field("shutdown", &self.shutdown.len())
            .finish()
    }
}
