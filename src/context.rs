//! Registry writes paired with event publication.
//!
//! [`TaskReporter`] is the only path through which the dispatcher and the
//! executors mutate tasks. Each call applies the registry update first and
//! publishes the matching event second, holding a per-task lock across both
//! steps, so a single task's events reach the publisher in the order its
//! updates were applied. Tasks never share a lock.
//!
//! [`TaskContext`] scopes the reporter to one task for executor code.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use aiwrite_tasks::context::TaskReporter;
//! use aiwrite_tasks::domain::IdempotencyKey;
//! use aiwrite_tasks::events::EventPublisher;
//! use aiwrite_tasks::store::memory::InMemoryTaskStore;
//! use aiwrite_tasks::store::TaskStore;
//! use aiwrite_tasks::{TaskKind, TaskStatus};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(InMemoryTaskStore::new());
//! let publisher = Arc::new(EventPublisher::default());
//! let reporter = Arc::new(TaskReporter::new(store.clone(), publisher.clone()));
//!
//! let key = IdempotencyKey::new("P1", TaskKind::Outline, None);
//! let record = store.create(&key, None, None).await.unwrap();
//! let ctx = reporter.context(record.task_id());
//!
//! reporter.transition(ctx.task_id(), TaskStatus::Running, None).await.unwrap();
//! ctx.report_progress(40, Some("halfway".to_string())).await.unwrap();
//!
//! let events = publisher.events_since("P1", 1);
//! assert_eq!(events.len(), 2);
//! assert_eq!(events[1].payload["progress"], 40);
//! # });
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::events::EventPublisher;
use crate::store::TaskStore;
use crate::types::event::EventDraft;
use crate::types::task::TaskStatus;

/// Applies registry updates and publishes their events in order.
pub struct TaskReporter {
    store: Arc<dyn TaskStore>,
    publisher: Arc<EventPublisher>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    cancel_tokens: DashMap<String, CancellationToken>,
}

impl std::fmt::Debug for TaskReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskReporter")
            .field("publisher", &self.publisher)
            .field("locked_tasks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl TaskReporter {
    /// Creates a reporter over a registry and a publisher.
    pub fn new(store: Arc<dyn TaskStore>, publisher: Arc<EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            locks: DashMap::new(),
            cancel_tokens: DashMap::new(),
        }
    }

    /// The registry.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// The publisher.
    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// A context scoped to `task_id`.
    pub fn context(self: &Arc<Self>, task_id: &str) -> TaskContext {
        TaskContext {
            reporter: Arc::clone(self),
            task_id: task_id.to_string(),
            cancel: self.cancel_token(task_id),
        }
    }

    /// The cancellation token fired when `task_id` is asked to cancel.
    pub fn cancel_token(&self, task_id: &str) -> CancellationToken {
        self.cancel_tokens
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    fn lock_for(&self, task_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, record: &TaskRecord) {
        if record.status().is_terminal() {
            self.locks.remove(record.task_id());
            self.cancel_tokens.remove(record.task_id());
        }
    }

    /// Publishes the current state of a freshly created task.
    pub fn announce(&self, record: &TaskRecord) {
        self.publisher
            .publish(&record.task.scope_id, EventDraft::status_of(&record.task));
    }

    /// Moves a task through the state machine and publishes the change.
    ///
    /// # Errors
    ///
    /// Propagates [`TaskError::InvalidTransition`] and registry failures;
    /// nothing is published on error.
    pub async fn transition(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let record = self.store.update_status(task_id, status, message).await?;
        tracing::debug!(task_id = task_id, status = %status, "task transitioned");
        self.publisher
            .publish(&record.task.scope_id, EventDraft::status_of(&record.task));
        self.release(&record);
        Ok(record)
    }

    /// Records progress and publishes it.
    ///
    /// # Errors
    ///
    /// Propagates progress validation and registry failures.
    pub async fn progress(
        &self,
        task_id: &str,
        progress: u8,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let record = self.store.update_progress(task_id, progress, message).await?;
        self.publisher
            .publish(&record.task.scope_id, EventDraft::progress_of(&record.task));
        Ok(record)
    }

    /// Requests cooperative cancellation: records `Canceling`, publishes it
    /// once, and fires the task's cancellation token.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidTransition`] for terminal tasks.
    pub async fn request_cancel(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let before = self.store.get(task_id).await?;
        let record = self.store.cancel(task_id).await?;
        if before.status() != TaskStatus::Canceling {
            tracing::warn!(task_id = task_id, from = %before.status(), "cancellation requested");
            self.publisher
                .publish(&record.task.scope_id, EventDraft::status_of(&record.task));
        }
        if let Some(token) = self.cancel_tokens.get(task_id) {
            token.cancel();
        }
        Ok(record)
    }
}

/// Executor-facing handle scoped to a single task.
///
/// Cloning is cheap and yields a handle to the same task.
#[derive(Clone)]
pub struct TaskContext {
    reporter: Arc<TaskReporter>,
    task_id: String,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl TaskContext {
    /// The task this context is scoped to.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Token fired when cancellation is requested.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current registry record.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] if the task vanished.
    pub async fn get(&self) -> Result<TaskRecord, TaskError> {
        self.reporter.store.get(&self.task_id).await
    }

    /// Records and publishes progress.
    ///
    /// # Errors
    ///
    /// Progress validation and registry failures.
    pub async fn report_progress(
        &self,
        progress: u8,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.reporter.progress(&self.task_id, progress, message).await
    }

    /// Returns `true` once cancellation has been requested, whether
    /// signalled through the token or only recorded in the registry.
    ///
    /// # Errors
    ///
    /// Registry read failures.
    pub async fn is_cancel_requested(&self) -> Result<bool, TaskError> {
        if self.cancel.is_cancelled() {
            return Ok(true);
        }
        let requested = self.get().await?.status() == TaskStatus::Canceling;
        if requested {
            self.cancel.cancel();
        }
        Ok(requested)
    }
}
