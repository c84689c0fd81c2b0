//! Core task types: [`TaskStatus`], [`TaskKind`], and the [`Task`] snapshot.
//!
//! # Serialization
//!
//! All types use `#[serde(rename_all = "camelCase")]` so snapshots can be
//! handed to the web boundary layer unchanged. Optional fields are omitted
//! when `None`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TaskError;

/// Task lifecycle status.
///
/// Terminal states (`Succeeded`, `Failed`, `Canceled`) reject all
/// transitions. `Canceling` is the cooperative intermediate state entered by
/// a cancel request: the owning executor acknowledges it by moving the task
/// to `Canceled`.
///
/// # State Machine
///
/// ```text
/// Queued    -> Running, Canceling
/// Running   -> Running (progress), Succeeded, Failed, Canceling
/// Canceling -> Canceled
/// Succeeded -> (terminal)
/// Failed    -> (terminal)
/// Canceled  -> (terminal)
/// ```
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::TaskStatus;
///
/// let status = TaskStatus::Queued;
/// assert!(!status.is_terminal());
/// assert!(status.can_transition_to(&TaskStatus::Running));
/// assert!(!status.can_transition_to(&TaskStatus::Succeeded));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created and waiting for a worker slot.
    Queued,
    /// An executor owns the task and is working on it.
    Running,
    /// Cancellation requested; waiting for the executor to acknowledge.
    Canceling,
    /// Finished successfully (terminal).
    Succeeded,
    /// Finished with an error (terminal).
    Failed,
    /// Cancellation acknowledged (terminal).
    Canceled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Canceling => write!(f, "canceling"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 6] = [
        Self::Queued,
        Self::Running,
        Self::Canceling,
        Self::Succeeded,
        Self::Failed,
        Self::Canceled,
    ];

    /// Returns `true` if this status is terminal.
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::TaskStatus;
    ///
    /// assert!(!TaskStatus::Canceling.is_terminal());
    /// assert!(TaskStatus::Canceled.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Returns `true` if the task still occupies its idempotency key
    /// (`Queued`, `Running` or `Canceling`).
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns `true` if transitioning from this status to `next` is valid.
    ///
    /// `Running -> Running` is the only allowed self-transition; it carries
    /// progress updates.
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::TaskStatus;
    ///
    /// assert!(TaskStatus::Running.can_transition_to(&TaskStatus::Running));
    /// assert!(TaskStatus::Canceling.can_transition_to(&TaskStatus::Canceled));
    /// assert!(!TaskStatus::Succeeded.can_transition_to(&TaskStatus::Running));
    /// assert!(!TaskStatus::Queued.can_transition_to(&TaskStatus::Queued));
    /// ```
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Canceling),
            Self::Running => matches!(
                next,
                Self::Running | Self::Succeeded | Self::Failed | Self::Canceling
            ),
            Self::Canceling => matches!(next, Self::Canceled),
            Self::Succeeded | Self::Failed | Self::Canceled => false,
        }
    }

    /// Validates a transition from this status to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidTransition`] when the state machine does
    /// not allow the move.
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::TaskStatus;
    ///
    /// assert!(TaskStatus::Running
    ///     .validate_transition("task-1", &TaskStatus::Succeeded)
    ///     .is_ok());
    /// assert!(TaskStatus::Succeeded
    ///     .validate_transition("task-1", &TaskStatus::Running)
    ///     .is_err());
    /// ```
    pub fn validate_transition(&self, task_id: &str, next: &Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            return Ok(());
        }

        let suggested_action = if self.is_terminal() {
            Some("task is in a terminal state; submit with regenerate to supersede it".to_string())
        } else if *self == Self::Canceling {
            Some("task is being canceled; only the cancel acknowledgement is accepted".to_string())
        } else if self == next {
            Some(format!("task is already {self}"))
        } else {
            None
        };

        Err(TaskError::InvalidTransition {
            task_id: task_id.to_string(),
            from: *self,
            to: *next,
            suggested_action,
        })
    }
}

/// Backend class a generation call is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendClass {
    /// Long-thinking model used for planning (outline, abstract).
    Reasoning,
    /// Prose model used for drafting and polishing.
    Writing,
    /// Multimodal model used for image descriptions.
    Vision,
}

impl fmt::Display for BackendClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reasoning => write!(f, "reasoning"),
            Self::Writing => write!(f, "writing"),
            Self::Vision => write!(f, "vision"),
        }
    }
}

/// The kind of generation work a task performs.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::TaskKind;
///
/// assert!(TaskKind::Draft.is_fan_out());
/// assert!(!TaskKind::Outline.is_fan_out());
/// assert_eq!(TaskKind::ImageAnalysis.as_str(), "image_analysis");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Document outline (sub-section structure).
    Outline,
    /// Per-section first draft.
    Draft,
    /// Per-section polishing pass.
    Refine,
    /// Document abstract (Chinese, then English).
    Abstract,
    /// Per-figure image description.
    ImageAnalysis,
    /// Per-table content normalisation.
    TableParse,
    /// Final document export.
    Export,
}

impl TaskKind {
    /// All kinds.
    pub const ALL: [TaskKind; 7] = [
        Self::Outline,
        Self::Draft,
        Self::Refine,
        Self::Abstract,
        Self::ImageAnalysis,
        Self::TableParse,
        Self::Export,
    ];

    /// Stable identifier used in idempotency keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::Draft => "draft",
            Self::Refine => "refine",
            Self::Abstract => "abstract",
            Self::ImageAnalysis => "image_analysis",
            Self::TableParse => "table_parse",
            Self::Export => "export",
        }
    }

    /// Returns `true` for kinds that run per sub-scope under a parent task.
    pub fn is_fan_out(&self) -> bool {
        matches!(
            self,
            Self::Draft | Self::Refine | Self::ImageAnalysis | Self::TableParse
        )
    }

    /// Returns `true` for kinds whose output an export depends on.
    pub fn produces_content(&self) -> bool {
        !matches!(self, Self::Export)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a unit of orchestrated work.
///
/// This is the value returned by `get_task` / `list_tasks`. Internal
/// bookkeeping (record version, idempotency key) lives on
/// [`TaskRecord`](crate::domain::TaskRecord).
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::{Task, TaskKind, TaskStatus};
///
/// let task = Task {
///     task_id: "t-1".to_string(),
///     scope_id: "P1".to_string(),
///     kind: TaskKind::Draft,
///     sub_scope_id: Some("ch2".to_string()),
///     parent_id: None,
///     status: TaskStatus::Queued,
///     progress: 0,
///     estimated_secs: Some(90.0),
///     elapsed_secs: 0.0,
///     remaining_secs: Some(90.0),
///     message: None,
///     created_at: "2026-10-17T10:30:00.000Z".to_string(),
///     last_updated_at: "2026-10-17T10:30:00.000Z".to_string(),
/// };
///
/// let json = serde_json::to_value(&task).unwrap();
/// assert_eq!(json["taskId"], "t-1");
/// assert_eq!(json["subScopeId"], "ch2");
/// assert!(json.get("message").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique identifier for this task.
    pub task_id: String,

    /// Parent scope (the document) this task belongs to.
    pub scope_id: String,

    /// The generation kind.
    pub kind: TaskKind,

    /// Section, figure or table targeted by the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_scope_id: Option<String>,

    /// Parent task for fan-out children.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Progress percentage, 0 to 100, non-decreasing.
    pub progress: u8,

    /// Estimated total duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_secs: Option<f64>,

    /// Seconds spent running so far.
    pub elapsed_secs: f64,

    /// Estimated seconds left, floored at zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<f64>,

    /// Last error or status note. Always set on failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC 3339 creation timestamp.
    pub created_at: String,

    /// RFC 3339 timestamp of the last mutation.
    pub last_updated_at: String,
}

impl Task {
    /// Returns `true` if this task is the parent of a fan-out.
    pub fn is_parent(&self) -> bool {
        self.kind.is_fan_out() && self.sub_scope_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_serde() {
        for status in TaskStatus::ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.to_string());
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Canceling.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn queued_cannot_finish_without_running() {
        assert!(!TaskStatus::Queued.can_transition_to(&TaskStatus::Succeeded));
        assert!(!TaskStatus::Queued.can_transition_to(&TaskStatus::Failed));
        assert!(!TaskStatus::Queued.can_transition_to(&TaskStatus::Canceled));
    }

    #[test]
    fn canceling_only_acknowledges() {
        for next in TaskStatus::ALL {
            assert_eq!(
                TaskStatus::Canceling.can_transition_to(&next),
                next == TaskStatus::Canceled,
                "canceling -> {next}"
            );
        }
    }

    #[test]
    fn validate_transition_carries_context() {
        let err = TaskStatus::Succeeded
            .validate_transition("task-9", &TaskStatus::Running)
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("task-9"));
        assert!(text.contains("succeeded"));
        assert!(text.contains("running"));
    }

    #[test]
    fn fan_out_kinds() {
        let fan_out: Vec<_> = TaskKind::ALL.iter().filter(|k| k.is_fan_out()).collect();
        assert_eq!(
            fan_out,
            vec![
                &TaskKind::Draft,
                &TaskKind::Refine,
                &TaskKind::ImageAnalysis,
                &TaskKind::TableParse
            ]
        );
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(TaskKind::TableParse).unwrap(),
            "table_parse"
        );
        assert_eq!(TaskKind::TableParse.to_string(), "table_parse");
    }
}
