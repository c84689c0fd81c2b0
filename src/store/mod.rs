//! Task Registry: store trait, generic implementation, and backends.
//!
//! # Architecture
//!
//! The registry has three layers:
//!
//! 1. **[`TaskStore`]** -- The registry contract, used as
//!    `Arc<dyn TaskStore>` by the resolver, dispatcher and estimator.
//!
//! 2. **[`GenericTaskStore<B>`](generic::GenericTaskStore)** -- All registry
//!    logic (state machine, progress monotonicity, key binding, scope
//!    index, CAS-based mutations, serialization). Has a blanket
//!    `TaskStore` impl.
//!
//! 3. **[`StorageBackend`]** -- Dumb KV trait that backends implement.
//!
//! # Backends
//!
//! - [`InMemoryBackend`](crate::store::memory::InMemoryBackend) --
//!   Thread-safe in-memory backend using `DashMap`. Used by
//!   [`InMemoryTaskStore`](crate::store::memory::InMemoryTaskStore).

pub mod backend;
pub mod generic;
pub mod memory;

use async_trait::async_trait;

pub use backend::{StorageBackend, StorageError, VersionedRecord};
pub use memory::{InMemoryBackend, InMemoryTaskStore};

use crate::domain::{IdempotencyKey, TaskRecord};
use crate::error::TaskError;
use crate::types::task::TaskStatus;

/// Estimator-owned timing fields. `None` leaves a field unchanged.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::store::TimingUpdate;
///
/// let update = TimingUpdate {
///     elapsed_secs: Some(12.5),
///     remaining_secs: Some(47.5),
///     ..TimingUpdate::default()
/// };
/// assert!(update.estimated_secs.is_none());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingUpdate {
    /// Estimated total duration.
    pub estimated_secs: Option<f64>,
    /// Seconds spent running.
    pub elapsed_secs: Option<f64>,
    /// Seconds left, floored at zero by the store.
    pub remaining_secs: Option<f64>,
}

/// The Task Registry contract.
///
/// The registry is the single source of truth for task lifecycle. Every
/// mutation is keyed by task id; tasks for different keys never contend.
///
/// Cancellation is cooperative: [`cancel`](TaskStore::cancel) only records
/// the request. The owning executor observes `Canceling` at its next safe
/// point and acknowledges it with `update_status(.., Canceled, ..)`. An
/// executor that never checks runs to natural completion.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Creates a queued task bound to `key`.
    ///
    /// `supersede` names the terminal task currently bound to the key when
    /// regenerating; `None` requires the key to be unbound.
    ///
    /// # Errors
    ///
    /// - [`TaskError::KeyConflict`] if another task claimed the key.
    /// - [`TaskError::StoreError`] on backend failures.
    async fn create(
        &self,
        key: &IdempotencyKey,
        parent_id: Option<&str>,
        supersede: Option<&str>,
    ) -> Result<TaskRecord, TaskError>;

    /// Retrieves a task by ID.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if no such task exists.
    async fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError>;

    /// Returns the task currently bound to `key`, live or terminal.
    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<TaskRecord>, TaskError>;

    /// Lists every task in a scope, oldest first, superseded ones included.
    async fn list_by_scope(&self, scope_id: &str) -> Result<Vec<TaskRecord>, TaskError>;

    /// Moves a task through the state machine.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidTransition`] on an illegal move; the record
    ///   is not mutated.
    async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError>;

    /// Records non-decreasing progress on a running task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::ProgressRegression`] / [`TaskError::InvalidProgress`].
    /// - [`TaskError::InvalidTransition`] if the task is not running.
    async fn update_progress(
        &self,
        task_id: &str,
        progress: u8,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError>;

    /// Updates the estimator-owned timing fields of a live task.
    async fn update_timing(
        &self,
        task_id: &str,
        timing: TimingUpdate,
    ) -> Result<TaskRecord, TaskError>;

    /// Requests cooperative cancellation of a queued or running task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidTransition`] if the task is terminal.
    async fn cancel(&self, task_id: &str) -> Result<TaskRecord, TaskError>;
}

// ---- Blanket impl for GenericTaskStore<B> ----

#[async_trait]
impl<B: StorageBackend + 'static> TaskStore for generic::GenericTaskStore<B> {
    async fn create(
        &self,
        key: &IdempotencyKey,
        parent_id: Option<&str>,
        supersede: Option<&str>,
    ) -> Result<TaskRecord, TaskError> {
        self.create(key, parent_id, supersede).await
    }

    async fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.get(task_id).await
    }

    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<TaskRecord>, TaskError> {
        self.find_by_key(key).await
    }

    async fn list_by_scope(&self, scope_id: &str) -> Result<Vec<TaskRecord>, TaskError> {
        self.list_by_scope(scope_id).await
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.update_status(task_id, status, message).await
    }

    async fn update_progress(
        &self,
        task_id: &str,
        progress: u8,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.update_progress(task_id, progress, message).await
    }

    async fn update_timing(
        &self,
        task_id: &str,
        timing: TimingUpdate,
    ) -> Result<TaskRecord, TaskError> {
        self.update_timing(task_id, timing).await
    }

    async fn cancel(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.cancel(task_id).await
    }
}
