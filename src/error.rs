//! Error types for task registry and dispatch operations.
//!
//! [`TaskError`] is the error every registry, resolver and dispatcher call
//! returns. Model-call failures have their own taxonomy in
//! [`GatewayError`](crate::gateway::GatewayError) and are recorded verbatim
//! in the failed task's message.

use thiserror::Error;

use crate::types::task::TaskStatus;

/// Errors that can occur during task operations.
///
/// Each variant carries the task ID or key involved. Use
/// [`error_code`](TaskError::error_code) to map to a stable numeric
/// category for the boundary layer.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::TaskError;
///
/// let err = TaskError::NotFound {
///     task_id: "missing-task".to_string(),
/// };
/// assert_eq!(err.error_code(), -32602);
/// assert!(err.to_string().contains("missing-task"));
/// ```
#[derive(Debug, Error)]
pub enum TaskError {
    /// Attempted a transition the state machine does not allow. Indicates a
    /// programming error in the caller; never retried.
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The task that was being transitioned.
        task_id: String,
        /// The current status of the task.
        from: TaskStatus,
        /// The rejected target status.
        to: TaskStatus,
        /// Optional hint for the caller.
        suggested_action: Option<String>,
    },

    /// Task with the given ID was not found.
    #[error("task not found: {task_id}")]
    NotFound {
        /// The task ID that was not found.
        task_id: String,
    },

    /// A progress update would lower the recorded progress.
    #[error("progress for task {task_id} cannot go from {current} back to {requested}")]
    ProgressRegression {
        /// The task being updated.
        task_id: String,
        /// Progress currently recorded.
        current: u8,
        /// Rejected progress value.
        requested: u8,
    },

    /// A progress value outside 0..=100.
    #[error("progress {value} out of range for task {task_id}")]
    InvalidProgress {
        /// The task being updated.
        task_id: String,
        /// Rejected value.
        value: u8,
    },

    /// A compare-and-swap write lost a race with another writer.
    #[error(
        "concurrent modification of task {task_id}: expected version {expected_version}, found {actual_version}"
    )]
    ConcurrentModification {
        /// The task being written.
        task_id: String,
        /// Version the writer read.
        expected_version: u64,
        /// Version found at write time.
        actual_version: u64,
    },

    /// Another live task already holds the idempotency key.
    #[error("idempotency key {key} is held by another task")]
    KeyConflict {
        /// The contested key.
        key: String,
    },

    /// The request itself is malformed (unknown scope, sub-scopes on a
    /// document-scope kind, and so on).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Backend storage error.
    #[error("store error: {0}")]
    StoreError(String),

    /// The dispatcher no longer accepts work.
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

impl TaskError {
    /// Maps this error to a numeric category.
    ///
    /// - `-32602` (caller error): `InvalidTransition`, `NotFound`,
    ///   `ProgressRegression`, `InvalidProgress`, `InvalidRequest`
    /// - `-32603` (internal error): `ConcurrentModification`, `KeyConflict`,
    ///   `StoreError`, `ShuttingDown`
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::{TaskError, TaskStatus};
    ///
    /// let err = TaskError::InvalidTransition {
    ///     task_id: "t1".to_string(),
    ///     from: TaskStatus::Succeeded,
    ///     to: TaskStatus::Running,
    ///     suggested_action: None,
    /// };
    /// assert_eq!(err.error_code(), -32602);
    ///
    /// let err = TaskError::StoreError("db timeout".to_string());
    /// assert_eq!(err.error_code(), -32603);
    /// ```
    pub fn error_code(&self) -> i32 {
        match self {
            Self::InvalidTransition { .. }
            | Self::NotFound { .. }
            | Self::ProgressRegression { .. }
            | Self::InvalidProgress { .. }
            | Self::InvalidRequest(_) => -32602,
            Self::ConcurrentModification { .. }
            | Self::KeyConflict { .. }
            | Self::StoreError(_)
            | Self::ShuttingDown => -32603,
        }
    }

    /// Returns `true` if a retry of the same registry operation may succeed.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::KeyConflict { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = TaskError::NotFound {
            task_id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "task not found: abc");

        let err = TaskError::ProgressRegression {
            task_id: "def".to_string(),
            current: 60,
            requested: 40,
        };
        assert_eq!(
            err.to_string(),
            "progress for task def cannot go from 60 back to 40"
        );
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            TaskError::InvalidTransition {
                task_id: "t".to_string(),
                from: TaskStatus::Failed,
                to: TaskStatus::Running,
                suggested_action: None,
            }
            .error_code(),
            -32602
        );
        assert_eq!(
            TaskError::KeyConflict {
                key: "P1:draft".to_string()
            }
            .error_code(),
            -32603
        );
        assert_eq!(TaskError::ShuttingDown.error_code(), -32603);
    }

    #[test]
    fn contention_errors() {
        assert!(TaskError::KeyConflict {
            key: "k".to_string()
        }
        .is_contention());
        assert!(!TaskError::StoreError("x".to_string()).is_contention());
    }
}
