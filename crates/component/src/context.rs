//! Execution context handed to component bodies.
//!
//! Cancellation is cooperative: a body observes the [`CancellationToken`]
//! through [`ExecutionContext::checkpoint`] or by racing
//! [`ExecutionContext::cancelled`] against its own work.

use std::sync::Arc;

use tokio::sync::watch;

use crate::component::ComponentError;

/// Shared flag that flips once from "running" to "cancelled".
///
/// Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-invocation context: which component runs, on behalf of which task,
/// and the cancellation token for that run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub component_key: String,
    /// Set when the invocation runs as a tracked background task.
    pub task_id: Option<String>,
    /// 1-based attempt number, bumped by the retry wrapper.
    pub attempt: u32,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(component_key: impl Into<String>) -> Self {
        Self {
            component_key: component_key.into(),
            task_id: None,
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative checkpoint: returns `Err(Cancelled)` once cancellation
    /// was requested.
    pub fn checkpoint(&self) -> Result<(), ComponentError> {
        if self.cancel.is_cancelled() {
            Err(ComponentError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
