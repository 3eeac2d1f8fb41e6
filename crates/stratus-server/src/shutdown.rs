//! Server-wide shutdown signal and task draining.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates shutdown across the listener, websocket sessions and the
/// session sweeper.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every task holding a token.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then wait up to `timeout` for `handles` to finish.
    ///
    /// Tasks still running after the timeout are aborted.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) {
        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for tasks to complete"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(?timeout, "shutdown timed out, aborting remaining tasks");
            for handle in aborts {
                handle.abort();
            }
        }
    }
}
