use crate::record::TaskRecord;

/// Change published by the [`TaskStore`](crate::store::TaskStore) on its
/// broadcast channel. Each event carries a snapshot taken under the lock.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Created(TaskRecord),
    StatusChanged(TaskRecord),
    Deleted { task_id: String },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::Created(r) | TaskEvent::StatusChanged(r) => &r.task_id,
            TaskEvent::Deleted { task_id } => task_id,
        }
    }
}
