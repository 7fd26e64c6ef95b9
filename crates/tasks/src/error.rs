use taskwire_component::{ComponentError, RegistryError};

use crate::record::TaskStatus;

/// Errors surfaced by the task router, store and executor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// A `required` component was called without a task directive, or a
    /// `forbidden` one with a directive.
    #[error("{0}")]
    PolicyViolation(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("Task ID '{0}' is already in use")]
    Conflict(String),

    #[error("Task '{task_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task '{task_id}' is {status}: {reason}")]
    InvalidState {
        task_id: String,
        status: TaskStatus,
        reason: String,
    },

    #[error("Task '{task_id}' is not finished (status: {status})")]
    NotReady { task_id: String, status: TaskStatus },

    #[error("Invalid cursor '{0}'")]
    InvalidCursor(String),

    #[error("Background tasks are disabled on this server")]
    TasksDisabled,

    /// Inline or auto-routed execution failed.
    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::PolicyViolation(_) => "policy_violation",
            TaskError::Registry(RegistryError::NotFound { .. }) => "not_found",
            TaskError::Registry(RegistryError::DuplicateKey { .. }) => "conflict",
            TaskError::NotFound(_) => "not_found",
            TaskError::Conflict(_) => "conflict",
            TaskError::InvalidTransition { .. } => "invalid_transition",
            TaskError::InvalidState { .. } => "invalid_state",
            TaskError::NotReady { .. } => "not_ready",
            TaskError::InvalidCursor(_) => "invalid_cursor",
            TaskError::TasksDisabled => "tasks_disabled",
            TaskError::Component(_) => "component",
            TaskError::Internal(_) => "internal",
        }
    }

    /// The task this error is about, when there is one.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskError::NotFound(id) | TaskError::Conflict(id) => Some(id),
            TaskError::InvalidTransition { task_id, .. }
            | TaskError::InvalidState { task_id, .. }
            | TaskError::NotReady { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwire_component::ComponentKind;

    #[test]
    fn test_kinds() {
        assert_eq!(TaskError::NotFound("t".into()).kind(), "not_found");
        assert_eq!(
            TaskError::from(RegistryError::NotFound {
                kind: ComponentKind::Tool,
                key: "x".into()
            })
            .kind(),
            "not_found"
        );
        assert_eq!(
            TaskError::NotReady {
                task_id: "t".into(),
                status: TaskStatus::Working
            }
            .kind(),
            "not_ready"
        );
        assert_eq!(TaskError::from(ComponentError::Cancelled).kind(), "component");
    }

    #[test]
    fn test_messages() {
        let err = TaskError::InvalidState {
            task_id: "t1".into(),
            status: TaskStatus::Working,
            reason: "delete requires force".into(),
        };
        assert_eq!(err.to_string(), "Task 't1' is working: delete requires force");
        assert_eq!(err.task_id(), Some("t1"));
        assert_eq!(TaskError::TasksDisabled.task_id(), None);
    }
}
