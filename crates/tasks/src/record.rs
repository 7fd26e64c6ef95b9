//! Task records and the status state machine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use taskwire_component::{ComponentError, ComponentKind, ComponentOutput};

/// Lifecycle status of a background task.
///
/// `submitted → working → (completed | failed | cancelled)`. The last three
/// are terminal: nothing moves out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Submitted,
    Working,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// A submitted task may finish without ever being observed as working.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Submitted => next != TaskStatus::Submitted,
            TaskStatus::Working => next.is_terminal(),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Submitted => "submitted",
            TaskStatus::Working => "working",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(TaskStatus::Submitted),
            "working" => Ok(TaskStatus::Working),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Sanitised error stored with a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
}

impl From<&ComponentError> for TaskFailure {
    fn from(err: &ComponentError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// One background execution of a component.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    pub component_key: String,
    pub task_type: ComponentKind,
    pub status: TaskStatus,
    /// Arguments snapshot taken at submission.
    pub arguments: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<ComponentOutput>,
    pub error: Option<TaskFailure>,
    /// Keep-alive after reaching a terminal status.
    pub ttl: Duration,
    pub status_message: Option<String>,
}

impl TaskRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// When a terminal record may be purged. `None` while the task runs.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if !self.is_terminal() {
            return None;
        }
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.updated_at.checked_add_signed(ttl))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| now >= deadline)
    }
}

/// Parameters for [`TaskStore::create`](crate::store::TaskStore::create).
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Caller-supplied ID; generated when absent.
    pub task_id: Option<String>,
    pub component_key: String,
    pub task_type: ComponentKind,
    pub arguments: Value,
    pub ttl: Duration,
}

impl NewTask {
    pub fn new(component_key: impl Into<String>, task_type: ComponentKind, arguments: Value) -> Self {
        Self {
            task_id: None,
            component_key: component_key.into(),
            task_type,
            arguments,
            ttl: Duration::from_millis(taskwire_core::config::DEFAULT_TTL_MS),
        }
    }

    pub fn with_task_id(mut self, task_id: Option<String>) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Selection criteria for listing tasks. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<ComponentKind>,
    pub component_key: Option<String>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_task_type(mut self, task_type: ComponentKind) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_component_key(mut self, key: impl Into<String>) -> Self {
        self.component_key = Some(key.into());
        self
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.status.map_or(true, |s| s == record.status)
            && self.task_type.map_or(true, |t| t == record.task_type)
            && self
                .component_key
                .as_deref()
                .map_or(true, |k| k == record.component_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: TaskStatus) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            task_id: "t1".to_string(),
            component_key: "double".to_string(),
            task_type: ComponentKind::Tool,
            status,
            arguments: Value::Null,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            ttl: Duration::from_secs(60),
            status_message: None,
        }
    }

    #[test]
    fn test_transitions() {
        use TaskStatus::*;
        assert!(Submitted.can_transition_to(Working));
        assert!(Submitted.can_transition_to(Cancelled));
        assert!(Working.can_transition_to(Completed));
        assert!(Working.can_transition_to(Failed));
        assert!(!Working.can_transition_to(Submitted));
        assert!(!Working.can_transition_to(Working));
        for terminal in [Completed, Failed, Cancelled] {
            for next in [Submitted, Working, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_status_serde() {
        for status in [
            TaskStatus::Submitted,
            TaskStatus::Working,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_expiry_only_when_terminal() {
        let running = record(TaskStatus::Working);
        assert!(running.expires_at().is_none());
        assert!(!running.is_expired_at(Utc::now() + chrono::Duration::days(365)));

        let done = record(TaskStatus::Completed);
        let deadline = done.expires_at().unwrap();
        assert_eq!(deadline, done.updated_at + chrono::Duration::seconds(60));
        assert!(!done.is_expired_at(done.updated_at));
        assert!(done.is_expired_at(deadline));
    }

    #[test]
    fn test_filter() {
        let r = record(TaskStatus::Working);
        assert!(TaskFilter::default().matches(&r));
        assert!(TaskFilter::default().with_status(TaskStatus::Working).matches(&r));
        assert!(!TaskFilter::default().with_status(TaskStatus::Failed).matches(&r));
        assert!(!TaskFilter::default().with_task_type(ComponentKind::Prompt).matches(&r));
        assert!(TaskFilter::default()
            .with_task_type(ComponentKind::Tool)
            .with_component_key("double")
            .matches(&r));
    }

    #[test]
    fn test_failure_from_component_error() {
        let failure = TaskFailure::from(&ComponentError::ExecutionFailed("disk full".into()));
        assert_eq!(failure.kind, "execution_failed");
        assert_eq!(failure.message, "Execution failed: disk full");
    }
}
