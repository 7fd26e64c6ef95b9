//! In-memory task store.
//!
//! One `RwLock` guards an `IndexMap` of records keyed by task ID, so
//! listings come back in creation order. Every mutation (`create`,
//! `update_status`, `cancel`, `delete`) happens inside a single write-lock
//! scope; readers get cloned snapshots and never hold the lock across an
//! `.await`.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use taskwire_component::ComponentOutput;

use crate::error::TaskError;
use crate::events::TaskEvent;
use crate::record::{NewTask, TaskFailure, TaskFilter, TaskRecord, TaskStatus};

const EVENT_CAPACITY: usize = 256;

/// One page of a filtered listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    pub tasks: Vec<TaskRecord>,
    /// Opaque cursor for the next page, absent on the last one.
    pub next_cursor: Option<String>,
}

#[derive(Debug)]
pub struct TaskStore {
    records: RwLock<IndexMap<String, TaskRecord>>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(IndexMap::new()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, TaskRecord>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, TaskRecord>> {
        self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Receive every subsequent create/status/delete event.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Insert a new `submitted` record.
    ///
    /// Expired records are purged first, so an ID whose keep-alive has
    /// elapsed is free again. A caller-supplied ID still held by a live
    /// record fails with `Conflict`.
    pub fn create(&self, new: NewTask) -> Result<TaskRecord, TaskError> {
        let now = Utc::now();
        let mut records = self.write();

        let purged = purge_expired(&mut records, now);
        if purged > 0 {
            debug!(purged, "expired tasks purged on create");
        }

        let task_id = match new.task_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                if records.contains_key(&id) {
                    return Err(TaskError::Conflict(id));
                }
                id
            }
            None => loop {
                let candidate = Uuid::new_v4().to_string();
                if !records.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let record = TaskRecord {
            task_id: task_id.clone(),
            component_key: new.component_key,
            task_type: new.task_type,
            status: TaskStatus::Submitted,
            arguments: new.arguments,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            ttl: new.ttl,
            status_message: None,
        };
        records.insert(task_id.clone(), record.clone());
        drop(records);

        info!(
            task_id = %task_id,
            component = %record.component_key,
            task_type = %record.task_type,
            "task created"
        );
        self.publish(TaskEvent::Created(record.clone()));
        Ok(record)
    }

    /// Snapshot of one record. Expired records are treated as absent.
    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        let now = Utc::now();
        self.read()
            .get(task_id)
            .filter(|r| !r.is_expired_at(now))
            .cloned()
    }

    /// Move a record along the state machine.
    ///
    /// `result` is kept only for `completed`, `error` only for `failed`.
    pub fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<ComponentOutput>,
        error: Option<TaskFailure>,
    ) -> Result<TaskRecord, TaskError> {
        self.transition(task_id, status, result, error, || true)
    }

    /// [`update_status`](Self::update_status) that first re-checks
    /// `still_current` under the write lock. Used by executor runs so a run
    /// whose record was deleted and re-created under the same ID cannot
    /// touch the new record.
    pub(crate) fn transition(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<ComponentOutput>,
        error: Option<TaskFailure>,
        still_current: impl FnOnce() -> bool,
    ) -> Result<TaskRecord, TaskError> {
        self.transition_then(task_id, status, result, error, still_current, || {})
    }

    /// [`transition`](Self::transition) that runs `on_applied` before the
    /// write lock is released.
    fn transition_then(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<ComponentOutput>,
        error: Option<TaskFailure>,
        still_current: impl FnOnce() -> bool,
        on_applied: impl FnOnce(),
    ) -> Result<TaskRecord, TaskError> {
        let now = Utc::now();
        let mut records = self.write();
        let record = records
            .get_mut(task_id)
            .filter(|r| !r.is_expired_at(now))
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        if !still_current() {
            return Err(TaskError::InvalidState {
                task_id: task_id.to_string(),
                status: record.status,
                reason: "run was cancelled".to_string(),
            });
        }

        if !record.status.can_transition_to(status) {
            return Err(TaskError::InvalidTransition {
                task_id: task_id.to_string(),
                from: record.status,
                to: status,
            });
        }

        let from = record.status;
        apply_status(record, status, result, error, now);
        let snapshot = record.clone();
        on_applied();
        drop(records);

        debug!(task_id = %task_id, from = %from, to = %status, "task status changed");
        self.publish(TaskEvent::StatusChanged(snapshot.clone()));
        Ok(snapshot)
    }

    /// Mark a non-terminal task `cancelled`, discarding any pending result.
    /// Terminal tasks fail with `InvalidState`.
    pub fn cancel(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.cancel_then(task_id, || {})
    }

    /// [`cancel`](Self::cancel) that runs `on_cancelled` while the record is
    /// still locked.
    pub(crate) fn cancel_then(
        &self,
        task_id: &str,
        on_cancelled: impl FnOnce(),
    ) -> Result<TaskRecord, TaskError> {
        let cancelled = self.transition_then(
            task_id,
            TaskStatus::Cancelled,
            None,
            None,
            || true,
            on_cancelled,
        );
        match cancelled {
            Err(TaskError::InvalidTransition { task_id, from, .. }) => Err(TaskError::InvalidState {
                task_id,
                status: from,
                reason: "terminal tasks cannot be cancelled".to_string(),
            }),
            other => other,
        }
    }

    /// Snapshot of all live records matching `filter`, in creation order.
    pub fn list(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        let now = Utc::now();
        self.read()
            .values()
            .filter(|r| !r.is_expired_at(now) && filter.matches(r))
            .cloned()
            .collect()
    }

    /// Paginated variant of [`list`](Self::list). The cursor is the offset
    /// into the filtered listing.
    pub fn page(
        &self,
        filter: &TaskFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TaskPage, TaskError> {
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| TaskError::InvalidCursor(c.to_string()))?,
            None => 0,
        };
        let limit = limit.max(1);

        let all = self.list(filter);
        let end = offset.saturating_add(limit).min(all.len());
        let tasks = all.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < all.len()).then(|| end.to_string());

        Ok(TaskPage { tasks, next_cursor })
    }

    /// Remove a record. Non-terminal records need `force`.
    pub fn delete(&self, task_id: &str, force: bool) -> Result<TaskRecord, TaskError> {
        self.delete_then(task_id, force, || {})
    }

    /// [`delete`](Self::delete) that runs `on_removed` before the ID can be
    /// taken by a new record.
    pub(crate) fn delete_then(
        &self,
        task_id: &str,
        force: bool,
        on_removed: impl FnOnce(),
    ) -> Result<TaskRecord, TaskError> {
        let now = Utc::now();
        let mut records = self.write();
        let record = records
            .get(task_id)
            .filter(|r| !r.is_expired_at(now))
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        if !record.is_terminal() && !force {
            return Err(TaskError::InvalidState {
                task_id: task_id.to_string(),
                status: record.status,
                reason: "deleting a running task requires force".to_string(),
            });
        }

        let removed = records
            .shift_remove(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        on_removed();
        drop(records);

        info!(task_id = %task_id, status = %removed.status, force, "task deleted");
        self.publish(TaskEvent::Deleted {
            task_id: task_id.to_string(),
        });
        Ok(removed)
    }

    /// Purge terminal records whose keep-alive has elapsed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// [`sweep`](Self::sweep) against an explicit clock.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let purged = purge_expired(&mut self.write(), now);
        if purged > 0 {
            info!(purged, "expired tasks swept");
        }
        purged
    }

    /// Number of stored records. Expired ones count until the next
    /// `create` or sweep.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_expired(records: &mut IndexMap<String, TaskRecord>, now: DateTime<Utc>) -> usize {
    let before = records.len();
    records.retain(|_, r| !r.is_expired_at(now));
    before - records.len()
}

fn apply_status(
    record: &mut TaskRecord,
    status: TaskStatus,
    result: Option<ComponentOutput>,
    error: Option<TaskFailure>,
    now: DateTime<Utc>,
) {
    record.status = status;
    record.updated_at = now;
    match status {
        TaskStatus::Completed => {
            record.result = result;
            record.status_message = Some("Task completed successfully".to_string());
        }
        TaskStatus::Failed => {
            record.status_message = Some(match &error {
                Some(e) => format!("Task failed: {}", e.message),
                None => "Task failed".to_string(),
            });
            record.error = error;
        }
        TaskStatus::Cancelled => {
            record.result = None;
            record.status_message = Some("Task cancelled".to_string());
        }
        TaskStatus::Submitted | TaskStatus::Working => {}
    }
}
