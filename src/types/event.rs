//! Lifecycle and progress notifications published per scope.
//!
//! An [`Event`] is immutable once published. Within a scope, events carry a
//! strictly increasing `sequence` starting at 1, so a reconnecting observer
//! can resume from the last sequence it saw.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::types::task::{Task, TaskStatus};

/// What an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A task moved to a new status.
    StatusChanged,
    /// A task's progress or timing changed.
    ProgressUpdated,
    /// A task failed; the payload carries the message.
    Error,
    /// A task reached `succeeded`.
    Completed,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusChanged => write!(f, "status_changed"),
            Self::ProgressUpdated => write!(f, "progress_updated"),
            Self::Error => write!(f, "error"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// An immutable, sequenced notification.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::{Event, EventType};
/// use serde_json::json;
///
/// let event = Event {
///     scope_id: "P1".to_string(),
///     event_type: EventType::ProgressUpdated,
///     payload: json!({"taskId": "t-1", "progress": 60}),
///     sequence: 7,
///     created_at: "2026-10-17T10:30:00.000Z".to_string(),
/// };
///
/// let json = serde_json::to_value(&event).unwrap();
/// assert_eq!(json["eventType"], "progress_updated");
/// assert_eq!(json["sequence"], 7);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Scope (document) the event belongs to.
    pub scope_id: String,

    /// Event category.
    pub event_type: EventType,

    /// Event body; for task events this is the task snapshot fields that
    /// changed plus `taskId`.
    pub payload: Value,

    /// Monotonic sequence number within the scope, starting at 1.
    pub sequence: u64,

    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Event body before the publisher assigns a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    /// Event category.
    pub event_type: EventType,
    /// Event body.
    pub payload: Value,
}

impl EventDraft {
    /// Builds the event describing a status change of `task`.
    ///
    /// Terminal successes are reported as [`EventType::Completed`] and
    /// failures as [`EventType::Error`]; everything else is
    /// [`EventType::StatusChanged`].
    pub fn status_of(task: &Task) -> Self {
        let event_type = match task.status {
            TaskStatus::Succeeded => EventType::Completed,
            TaskStatus::Failed => EventType::Error,
            _ => EventType::StatusChanged,
        };
        Self {
            event_type,
            payload: task_payload(task),
        }
    }

    /// Builds the event describing a progress change of `task`.
    pub fn progress_of(task: &Task) -> Self {
        Self {
            event_type: EventType::ProgressUpdated,
            payload: task_payload(task),
        }
    }
}

fn task_payload(task: &Task) -> Value {
    json!({
        "taskId": task.task_id,
        "kind": task.kind,
        "subScopeId": task.sub_scope_id,
        "parentId": task.parent_id,
        "status": task.status,
        "progress": task.progress,
        "message": task.message,
        "remainingSecs": task.remaining_secs,
    })
}
