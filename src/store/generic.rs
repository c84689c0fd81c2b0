//! Generic task store with all registry logic delegating to a [`StorageBackend`].
//!
//! [`GenericTaskStore`] implements every registry operation (state machine
//! transitions, progress monotonicity, idempotency key binding, scope
//! indexing, CAS-based mutations, JSON serialization) on top of any
//! [`StorageBackend`] implementation.
//!
//! Backends remain dumb key-value stores; all intelligence lives here.
//!
//! # CAS Semantics
//!
//! Every mutation reads the record, applies a validated change, and writes it
//! back with [`StorageBackend::put_if_version`]. A version mismatch re-reads
//! and re-validates, up to `max_cas_retries` times, before surfacing
//! [`TaskError::ConcurrentModification`]. Different tasks never contend.
//!
//! # Key Binding
//!
//! `create` writes the record under `task/{id}`, then claims the
//! `key/{idempotency_key}` pointer (`put_if_absent` for a fresh key, a CAS
//! on the pointer when superseding a terminal task), and only then adds the
//! scope index entry. A lost race deletes the unindexed record and returns
//! [`TaskError::KeyConflict`], so at most one task ever holds a key live.

use crate::domain::key::IdempotencyKey;
use crate::domain::record::TaskRecord;
use crate::error::TaskError;
use crate::store::backend::{
    idempotency_pointer_key, scope_index_key, scope_prefix, task_key, StorageBackend,
    StorageError,
};
use crate::store::TimingUpdate;
use crate::types::task::TaskStatus;

/// Default number of compare-and-swap attempts per mutation.
pub const DEFAULT_CAS_RETRIES: usize = 8;

/// Message recorded on a failed task when the caller supplied none.
const DEFAULT_FAILURE_MESSAGE: &str = "task failed without a reported cause";

/// Generic task store that delegates all storage to a [`StorageBackend`].
///
/// # Type Parameters
///
/// * `B` - A [`StorageBackend`] implementation.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::store::generic::GenericTaskStore;
/// use aiwrite_tasks::store::memory::InMemoryBackend;
///
/// let store = GenericTaskStore::new(InMemoryBackend::new()).with_cas_retries(4);
/// assert!(store.backend().is_empty());
/// ```
#[derive(Debug)]
pub struct GenericTaskStore<B: StorageBackend> {
    backend: B,
    max_cas_retries: usize,
}

impl<B: StorageBackend> GenericTaskStore<B> {
    /// Creates a store over `backend` with default settings.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            max_cas_retries: DEFAULT_CAS_RETRIES,
        }
    }

    /// Sets how many times a conflicting write is re-attempted.
    pub fn with_cas_retries(mut self, retries: usize) -> Self {
        self.max_cas_retries = retries.max(1);
        self
    }

    /// Returns a reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ---- Serialization helpers (private) ----

    fn serialize_record(record: &TaskRecord) -> Result<Vec<u8>, TaskError> {
        serde_json::to_vec(record)
            .map_err(|e| TaskError::StoreError(format!("failed to serialize TaskRecord: {e}")))
    }

    fn deserialize_record(data: &[u8], version: u64) -> Result<TaskRecord, TaskError> {
        let mut record: TaskRecord = serde_json::from_slice(data).map_err(|e| {
            TaskError::StoreError(format!("failed to deserialize TaskRecord: {e}"))
        })?;
        record.version = version;
        Ok(record)
    }

    fn map_storage_error(err: StorageError, task_id: &str) -> TaskError {
        match err {
            StorageError::NotFound { .. } => TaskError::NotFound {
                task_id: task_id.to_string(),
            },
            StorageError::VersionConflict {
                expected, actual, ..
            } => TaskError::ConcurrentModification {
                task_id: task_id.to_string(),
                expected_version: expected,
                actual_version: actual,
            },
            StorageError::AlreadyExists { key, .. } => TaskError::KeyConflict { key },
            StorageError::Backend { message, .. } => TaskError::StoreError(message),
        }
    }

    fn map_backend_error(err: StorageError) -> TaskError {
        TaskError::StoreError(err.to_string())
    }

    /// Applies `change` to the record with CAS, re-reading on conflict.
    ///
    /// `change` returns `Ok(false)` to leave the record untouched (no write).
    async fn mutate<F>(&self, task_id: &str, mut change: F) -> Result<TaskRecord, TaskError>
    where
        F: FnMut(&mut TaskRecord) -> Result<bool, TaskError> + Send,
    {
        let key = task_key(task_id);
        let mut last_conflict = None;

        for _ in 0..self.max_cas_retries {
            let versioned = self
                .backend
                .get(&key)
                .await
                .map_err(|e| Self::map_storage_error(e, task_id))?;
            let mut record = Self::deserialize_record(&versioned.data, versioned.version)?;

            if !change(&mut record)? {
                return Ok(record);
            }
            record.touch();

            let bytes = Self::serialize_record(&record)?;
            match self
                .backend
                .put_if_version(&key, &bytes, versioned.version)
                .await
            {
                Ok(new_version) => {
                    record.version = new_version;
                    return Ok(record);
                },
                Err(err @ StorageError::VersionConflict { .. }) => {
                    tracing::debug!(task_id = task_id, "task write lost a CAS race, retrying");
                    last_conflict = Some(err);
                },
                Err(err) => return Err(Self::map_storage_error(err, task_id)),
            }
        }

        Err(match last_conflict {
            Some(err) => Self::map_storage_error(err, task_id),
            None => TaskError::StoreError(format!("no write attempted for task {task_id}")),
        })
    }

    /// Creates a queued task bound to `key`.
    ///
    /// With `supersede = None` the key must be unbound. With
    /// `supersede = Some(previous_id)` the key must still point at
    /// `previous_id` and that task must be terminal; the previous record is
    /// kept for audit.
    ///
    /// # Errors
    ///
    /// - [`TaskError::KeyConflict`] if another task claimed the key first.
    /// - [`TaskError::StoreError`] on backend failures.
    pub async fn create(
        &self,
        key: &IdempotencyKey,
        parent_id: Option<&str>,
        supersede: Option<&str>,
    ) -> Result<TaskRecord, TaskError> {
        let mut record = TaskRecord::new(key, parent_id.map(str::to_string));
        let task_id = record.task_id().to_string();
        let record_key = task_key(&task_id);
        let pointer_key = idempotency_pointer_key(&record.idempotency_key);

        let bytes = Self::serialize_record(&record)?;
        record.version = self
            .backend
            .put(&record_key, &bytes)
            .await
            .map_err(Self::map_backend_error)?;

        if let Err(err) = self.bind_key(&pointer_key, &task_id, supersede).await {
            if let Err(cleanup) = self.backend.delete(&record_key).await {
                tracing::warn!(
                    task_id = %task_id,
                    error = %cleanup,
                    "failed to remove record after losing key binding"
                );
            }
            return Err(err);
        }

        self.backend
            .put(&scope_index_key(&record.task.scope_id, &task_id), &[])
            .await
            .map_err(Self::map_backend_error)?;

        tracing::debug!(
            task_id = %task_id,
            key = %record.idempotency_key,
            superseded = ?supersede,
            "task created"
        );
        Ok(record)
    }

    async fn bind_key(
        &self,
        pointer_key: &str,
        task_id: &str,
        supersede: Option<&str>,
    ) -> Result<(), TaskError> {
        let conflict = || TaskError::KeyConflict {
            key: pointer_key.trim_start_matches("key/").to_string(),
        };

        match supersede {
            None => match self.backend.put_if_absent(pointer_key, task_id.as_bytes()).await {
                Ok(_) => Ok(()),
                Err(StorageError::AlreadyExists { .. }) => Err(conflict()),
                Err(err) => Err(Self::map_backend_error(err)),
            },
            Some(previous_id) => {
                let pointer = match self.backend.get(pointer_key).await {
                    Ok(pointer) => pointer,
                    Err(StorageError::NotFound { .. }) => return Err(conflict()),
                    Err(err) => return Err(Self::map_backend_error(err)),
                };
                if pointer.data != previous_id.as_bytes() {
                    return Err(conflict());
                }
                let previous = self.get(previous_id).await?;
                if !previous.status().is_terminal() {
                    return Err(conflict());
                }
                match self
                    .backend
                    .put_if_version(pointer_key, task_id.as_bytes(), pointer.version)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(StorageError::VersionConflict { .. } | StorageError::NotFound { .. }) => {
                        Err(conflict())
                    },
                    Err(err) => Err(Self::map_backend_error(err)),
                }
            },
        }
    }

    /// Retrieves a task by ID.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if no such task exists.
    pub async fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        let versioned = self
            .backend
            .get(&task_key(task_id))
            .await
            .map_err(|e| Self::map_storage_error(e, task_id))?;
        Self::deserialize_record(&versioned.data, versioned.version)
    }

    /// Returns the task currently bound to `key`, if any.
    pub async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<TaskRecord>, TaskError> {
        let pointer = match self
            .backend
            .get(&idempotency_pointer_key(&key.to_string()))
            .await
        {
            Ok(pointer) => pointer,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(Self::map_backend_error(err)),
        };
        let task_id = String::from_utf8(pointer.data)
            .map_err(|e| TaskError::StoreError(format!("corrupt key pointer for {key}: {e}")))?;

        match self.get(&task_id).await {
            Ok(record) => Ok(Some(record)),
            Err(TaskError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Lists every task of a scope, superseded ones included, oldest first.
    pub async fn list_by_scope(&self, scope_id: &str) -> Result<Vec<TaskRecord>, TaskError> {
        let prefix = scope_prefix(scope_id);
        let entries = self
            .backend
            .list_by_prefix(&prefix)
            .await
            .map_err(Self::map_backend_error)?;

        let mut records = Vec::with_capacity(entries.len());
        for (index_key, _) in entries {
            let task_id = &index_key[prefix.len()..];
            match self.get(task_id).await {
                Ok(record) => records.push(record),
                Err(TaskError::NotFound { .. }) => {
                    tracing::warn!(task_id = task_id, scope_id = scope_id, "dangling scope index entry");
                },
                Err(err) => return Err(err),
            }
        }

        records.sort_by(|a, b| {
            a.task
                .created_at
                .cmp(&b.task.created_at)
                .then_with(|| a.task.task_id.cmp(&b.task.task_id))
        });
        Ok(records)
    }

    /// Moves a task to `status`, enforcing the state machine.
    ///
    /// Entering `Running` stamps the start time. Entering a terminal status
    /// freezes elapsed time and zeroes the remaining estimate; `Succeeded`
    /// also sets progress to 100. A `Failed` task always gets a non-empty
    /// message.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidTransition`] if the move is illegal; the record
    ///   is left untouched.
    /// - [`TaskError::NotFound`] if no such task exists.
    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.mutate(task_id, |record| {
            record.status().validate_transition(task_id, &status)?;

            if status == TaskStatus::Running && record.started_at.is_none() {
                record.started_at = Some(chrono::Utc::now());
            }
            if status.is_terminal() {
                record.task.elapsed_secs = record.running_secs();
                record.task.remaining_secs = Some(0.0);
            }
            if status == TaskStatus::Succeeded {
                record.task.progress = 100;
            }

            record.task.status = status;
            match (status, message.clone()) {
                (TaskStatus::Failed, msg) => {
                    record.task.message = Some(
                        msg.filter(|m| !m.trim().is_empty())
                            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
                    );
                },
                (_, Some(msg)) => record.task.message = Some(msg),
                (_, None) => {},
            }
            Ok(true)
        })
        .await
    }

    /// Records progress on a running task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidProgress`] if `progress > 100`.
    /// - [`TaskError::ProgressRegression`] if `progress` is below the
    ///   recorded value.
    /// - [`TaskError::InvalidTransition`] if the task is not running.
    pub async fn update_progress(
        &self,
        task_id: &str,
        progress: u8,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        if progress > 100 {
            return Err(TaskError::InvalidProgress {
                task_id: task_id.to_string(),
                value: progress,
            });
        }

        self.mutate(task_id, |record| {
            if record.status() != TaskStatus::Running {
                return Err(TaskError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: record.status(),
                    to: TaskStatus::Running,
                    suggested_action: Some("start the task before reporting progress".to_string()),
                });
            }
            if progress < record.task.progress {
                return Err(TaskError::ProgressRegression {
                    task_id: task_id.to_string(),
                    current: record.task.progress,
                    requested: progress,
                });
            }
            record.task.progress = progress;
            if message.is_some() {
                record.task.message = message.clone();
            }
            Ok(true)
        })
        .await
    }

    /// Writes estimator-owned timing fields. Terminal tasks are returned
    /// unchanged.
    pub async fn update_timing(
        &self,
        task_id: &str,
        timing: TimingUpdate,
    ) -> Result<TaskRecord, TaskError> {
        self.mutate(task_id, |record| {
            if record.status().is_terminal() {
                return Ok(false);
            }
            if let Some(estimated) = timing.estimated_secs {
                record.task.estimated_secs = Some(estimated.max(0.0));
            }
            if let Some(elapsed) = timing.elapsed_secs {
                record.task.elapsed_secs = elapsed.max(0.0);
            }
            if let Some(remaining) = timing.remaining_secs {
                record.task.remaining_secs = Some(remaining.max(0.0));
            }
            Ok(true)
        })
        .await
    }

    /// Requests cooperative cancellation.
    ///
    /// Queued and running tasks move to `Canceling`; a task already
    /// canceling is returned as-is.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidTransition`] if the task is terminal.
    pub async fn cancel(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.mutate(task_id, |record| {
            if record.status() == TaskStatus::Canceling {
                return Ok(false);
            }
            record
                .status()
                .validate_transition(task_id, &TaskStatus::Canceling)?;
            record.task.status = TaskStatus::Canceling;
            record.task.message = Some("cancellation requested".to_string());
            Ok(true)
        })
        .await
    }
}
