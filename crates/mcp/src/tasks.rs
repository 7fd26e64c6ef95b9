//! `tasks/*` operations over the task store and executor.
//!
//! Every response carries the related-task envelope in `_meta`. Results of
//! terminal tasks are rendered with the same wire types the synchronous
//! methods use, so `tasks/result` reads like the synchronous call would have.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use taskwire_component::ComponentOutput;
use taskwire_tasks::{TaskError, TaskExecutor, TaskFilter, TaskRecord, TaskStatus, TaskStore};

use crate::error::McpError;
use crate::types::*;

/// Page size used when `tasks/list` is called without a limit.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Render a component's output as the result object of its request method.
pub fn render_output(output: ComponentOutput) -> Result<Value, McpError> {
    let value = match output {
        ComponentOutput::Tool(value) => serde_json::to_value(CallToolResult::from_value(value))?,
        ComponentOutput::Resource(contents) => {
            serde_json::to_value(ReadResourceResult { contents })?
        }
        ComponentOutput::Prompt(messages) => serde_json::to_value(GetPromptResult {
            description: None,
            messages: messages.into_iter().map(PromptMessageWire::from).collect(),
        })?,
    };
    Ok(value)
}

/// Protocol façade for background tasks.
#[derive(Clone)]
pub struct TaskProtocol {
    store: Arc<TaskStore>,
    executor: TaskExecutor,
    poll_interval: Duration,
}

impl TaskProtocol {
    pub fn new(store: Arc<TaskStore>, executor: TaskExecutor, poll_interval: Duration) -> Self {
        Self {
            store,
            executor,
            poll_interval,
        }
    }

    pub fn task_info(&self, record: &TaskRecord) -> TaskInfo {
        TaskInfo {
            task_id: record.task_id.clone(),
            status: record.status,
            created_at: record.created_at,
            last_updated_at: record.updated_at,
            ttl: duration_ms(record.ttl),
            poll_interval: duration_ms(self.poll_interval),
            status_message: record.status_message.clone(),
        }
    }

    /// Response to an invocation accepted as a background task.
    pub fn submitted(&self, record: &TaskRecord) -> CreateTaskResult {
        CreateTaskResult {
            task: self.task_info(record),
            meta: Some(related_task_meta(&record.task_id)),
        }
    }

    /// `tasks/get`
    pub fn get(&self, task_id: &str) -> Result<Value, McpError> {
        let record = self.lookup(task_id)?;
        self.info_with_meta(&record)
    }

    /// `tasks/result`: fails with `not_ready` until the task is terminal.
    pub fn result(&self, task_id: &str) -> Result<Value, McpError> {
        let record = self.lookup(task_id)?;
        let body = match record.status {
            TaskStatus::Completed => match record.result.clone() {
                Some(output) => render_output(output)?,
                None => {
                    return Err(TaskError::Internal(format!(
                        "completed task '{task_id}' has no result"
                    ))
                    .into())
                }
            },
            TaskStatus::Failed | TaskStatus::Cancelled => {
                let message = record
                    .status_message
                    .clone()
                    .unwrap_or_else(|| format!("Task {}", record.status));
                let mut failure = CallToolResult::error(message);
                // `{kind, message}` of the stored failure, for failed tasks.
                failure.structured_content =
                    record.error.as_ref().map(serde_json::to_value).transpose()?;
                serde_json::to_value(failure)?
            }
            status => {
                return Err(TaskError::NotReady {
                    task_id: task_id.to_string(),
                    status,
                }
                .into())
            }
        };
        Ok(attach_meta(body, related_task_meta(task_id)))
    }

    /// `tasks/list`
    pub fn list(&self, params: ListTasksParams) -> Result<ListTasksResult, McpError> {
        let filter = TaskFilter {
            status: params.status,
            task_type: params.task_type,
            component_key: params.component_key,
        };
        let page = self.store.page(
            &filter,
            params.cursor.as_deref(),
            params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )?;

        let meta = related_tasks_meta(page.tasks.iter().map(|r| r.task_id.as_str()));
        Ok(ListTasksResult {
            tasks: page.tasks.iter().map(|r| self.task_info(r)).collect(),
            next_cursor: page.next_cursor,
            meta: Some(meta),
        })
    }

    /// `tasks/cancel`
    pub fn cancel(&self, task_id: &str) -> Result<Value, McpError> {
        let record = self.executor.cancel(task_id)?;
        self.info_with_meta(&record)
    }

    /// `tasks/delete`
    pub fn delete(&self, task_id: &str, force: bool) -> Result<Value, McpError> {
        let removed = self.executor.delete(task_id, force)?;
        Ok(json!({
            "taskId": removed.task_id,
            "deleted": true,
            "_meta": related_task_meta(task_id),
        }))
    }

    fn lookup(&self, task_id: &str) -> Result<TaskRecord, McpError> {
        self.store
            .get(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()).into())
    }

    fn info_with_meta(&self, record: &TaskRecord) -> Result<Value, McpError> {
        let info = serde_json::to_value(self.task_info(record))?;
        Ok(attach_meta(info, related_task_meta(&record.task_id)))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
