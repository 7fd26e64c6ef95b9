//! Background execution of task records.
//!
//! [`TaskExecutor::submit`] is fire-and-forget: the component body runs in a
//! `tokio::spawn`ed task and reports its outcome through the store. Each
//! running task owns a [`CancellationToken`]; cancelling flips the store
//! record first and then signals the token, so a body that finishes late can
//! never overwrite `cancelled` with `completed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use taskwire_component::{
    CancellationToken, Component, ComponentError, ComponentOutput, ExecutionContext,
};

use crate::error::TaskError;
use crate::record::{TaskFailure, TaskRecord, TaskStatus};
use crate::store::TaskStore;

struct RunningTask {
    /// Distinguishes runs that reuse a task ID after a forced delete.
    run_id: u64,
    token: CancellationToken,
    abort: Option<AbortHandle>,
}

type RunningMap = Arc<Mutex<HashMap<String, RunningTask>>>;

fn lock(running: &RunningMap) -> MutexGuard<'_, HashMap<String, RunningTask>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<TaskStore>,
    running: RunningMap,
    next_run: Arc<AtomicU64>,
}

impl TaskExecutor {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self {
            store,
            running: Arc::new(Mutex::new(HashMap::new())),
            next_run: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Schedule `component` for the already-created `record` and return
    /// immediately.
    pub fn submit(&self, component: Arc<Component>, record: TaskRecord) {
        let task_id = record.task_id.clone();
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let ctx = ExecutionContext::new(component.key())
            .with_task_id(task_id.clone())
            .with_cancellation(token.clone());

        // Registered before spawning so a cancel racing the start finds it.
        lock(&self.running).insert(
            task_id.clone(),
            RunningTask {
                run_id,
                token,
                abort: None,
            },
        );

        let store = self.store.clone();
        let running = self.running.clone();
        let id = task_id.clone();
        let handle = tokio::spawn(async move {
            run_task(&store, &component, record.arguments, ctx).await;
            let mut running = lock(&running);
            if running.get(&id).is_some_and(|e| e.run_id == run_id) {
                running.remove(&id);
            }
        });

        if let Some(entry) = lock(&self.running)
            .get_mut(&task_id)
            .filter(|e| e.run_id == run_id)
        {
            entry.abort = Some(handle.abort_handle());
        }
        debug!(task_id = %task_id, "task scheduled");
    }

    /// Run the component in the request path.
    pub async fn execute_inline(
        &self,
        component: &Component,
        arguments: &Value,
    ) -> Result<ComponentOutput, ComponentError> {
        let ctx = ExecutionContext::new(component.key());
        component.execute(arguments, &ctx).await
    }

    /// Run the component on the background lane and wait for its outcome,
    /// without creating a task record.
    pub async fn run_to_completion(
        &self,
        component: Arc<Component>,
        arguments: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        let key = component.key().to_string();
        let handle = tokio::spawn(async move {
            let ctx = ExecutionContext::new(component.key());
            component.execute(&arguments, &ctx).await
        });
        match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                warn!(component = %key, error = %join_err, "background execution aborted");
                Err(ComponentError::ExecutionFailed(
                    "background execution aborted".to_string(),
                ))
            }
        }
    }

    /// Cancel a non-terminal task.
    pub fn cancel(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        let mut running = lock(&self.running);
        let record = self
            .store
            .cancel_then(task_id, || detach(&mut running, task_id))?;
        drop(running);

        info!(task_id = %task_id, "task cancelled");
        Ok(record)
    }

    /// Delete a task; with `force`, a running body is cancelled as well.
    ///
    /// The run is detached and signalled while the store still holds the
    /// record, so a run started under the same ID afterwards is never
    /// touched by the old body.
    pub fn delete(&self, task_id: &str, force: bool) -> Result<TaskRecord, TaskError> {
        let mut running = lock(&self.running);
        let removed = self
            .store
            .delete_then(task_id, force, || detach(&mut running, task_id))?;
        drop(running);
        Ok(removed)
    }

    /// Number of bodies currently scheduled or running.
    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }

    /// Cancel everything still running. Bodies that do not stop at their
    /// next await point are aborted.
    pub fn shutdown(&self) {
        let running = std::mem::take(&mut *lock(&self.running));
        if running.is_empty() {
            return;
        }
        info!(count = running.len(), "cancelling running tasks");
        for (task_id, entry) in running {
            if let Err(e) = self.store.cancel(&task_id) {
                debug!(task_id = %task_id, error = %e, "task already settled");
            }
            entry.token.cancel();
            if let Some(abort) = entry.abort {
                abort.abort();
            }
        }
    }
}

fn detach(running: &mut HashMap<String, RunningTask>, task_id: &str) {
    if let Some(entry) = running.remove(task_id) {
        entry.token.cancel();
    }
}

async fn run_task(
    store: &TaskStore,
    component: &Component,
    arguments: Value,
    ctx: ExecutionContext,
) {
    let task_id = ctx.task_id.clone().unwrap_or_default();

    let still_current = || !ctx.is_cancelled();

    if let Err(e) = store.transition(&task_id, TaskStatus::Working, None, None, still_current) {
        debug!(task_id = %task_id, error = %e, "task no longer runnable");
        return;
    }

    let outcome = tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(ComponentError::Cancelled),
        result = component.execute(&arguments, &ctx) => result,
    };

    let settled = match outcome {
        Ok(output) => store.transition(
            &task_id,
            TaskStatus::Completed,
            Some(output),
            None,
            still_current,
        ),
        Err(ComponentError::Cancelled) => {
            store.transition(&task_id, TaskStatus::Cancelled, None, None, still_current)
        }
        Err(err) => {
            warn!(task_id = %task_id, component = %component.key(), error = %err, "task failed");
            store.transition(
                &task_id,
                TaskStatus::Failed,
                None,
                Some(TaskFailure::from(&err)),
                still_current,
            )
        }
    };

    // Cancelled or deleted while running: the outcome is discarded.
    if let Err(e) = settled {
        debug!(task_id = %task_id, error = %e, "task outcome discarded");
    }
}
