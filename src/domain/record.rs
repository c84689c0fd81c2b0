//! Task record -- the registry's internal representation of a task.
//!
//! [`TaskRecord`] wraps the public [`Task`] snapshot with the fields needed
//! for storage: the idempotency key, the running start time, and the
//! storage version used for compare-and-swap writes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::key::IdempotencyKey;
use crate::types::task::{Task, TaskKind, TaskStatus};

/// Current UTC time in the RFC 3339 format used by task timestamps.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Internal storage representation of a task.
///
/// # Construction
///
/// ```
/// use aiwrite_tasks::domain::{IdempotencyKey, TaskRecord};
/// use aiwrite_tasks::{TaskKind, TaskStatus};
///
/// let key = IdempotencyKey::new("P1", TaskKind::Outline, None);
/// let record = TaskRecord::new(&key, None);
/// assert_eq!(record.task.status, TaskStatus::Queued);
/// assert_eq!(record.task.scope_id, "P1");
/// assert_eq!(record.idempotency_key, "P1:outline");
/// assert_eq!(record.task.progress, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// The public snapshot.
    pub task: Task,

    /// Rendered idempotency key.
    pub idempotency_key: String,

    /// When the task entered `Running`. `None` while queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Storage version, filled in by the store after every read and write.
    /// Not persisted inside the record bytes.
    #[serde(skip)]
    pub version: u64,
}

impl TaskRecord {
    /// Creates a queued record for `key`, optionally as a child of `parent_id`.
    pub fn new(key: &IdempotencyKey, parent_id: Option<String>) -> Self {
        let now = now_rfc3339();
        let task = Task {
            task_id: Uuid::new_v4().to_string(),
            scope_id: key.scope_id().to_string(),
            kind: key.kind(),
            sub_scope_id: key.sub_scope_id().map(str::to_string),
            parent_id,
            status: TaskStatus::Queued,
            progress: 0,
            estimated_secs: None,
            elapsed_secs: 0.0,
            remaining_secs: None,
            message: None,
            created_at: now.clone(),
            last_updated_at: now,
        };

        Self {
            task,
            idempotency_key: key.to_string(),
            started_at: None,
            version: 0,
        }
    }

    /// Convenience accessor for the task ID.
    pub fn task_id(&self) -> &str {
        &self.task.task_id
    }

    /// Convenience accessor for the status.
    pub fn status(&self) -> TaskStatus {
        self.task.status
    }

    /// Convenience accessor for the kind.
    pub fn kind(&self) -> TaskKind {
        self.task.kind
    }

    /// Seconds since the task entered `Running`, or zero while queued.
    pub fn running_secs(&self) -> f64 {
        self.started_at
            .map(|start| {
                let elapsed = Utc::now().signed_duration_since(start);
                elapsed.num_milliseconds().max(0) as f64 / 1000.0
            })
            .unwrap_or(0.0)
    }

    /// Returns a clone of the public snapshot.
    pub fn to_task(&self) -> Task {
        self.task.clone()
    }

    pub(crate) fn touch(&mut self) {
        self.task.last_updated_at = now_rfc3339();
    }
}
