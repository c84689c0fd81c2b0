//! In-memory storage backend and task store.
//!
//! [`InMemoryBackend`] is a thread-safe [`StorageBackend`] over
//! `DashMap<String, (Vec<u8>, u64)>`. It is a dumb KV store with no domain
//! logic; conditional writes hold the shard lock for the whole check-and-set.
//!
//! [`InMemoryTaskStore`] wraps
//! [`GenericTaskStore<InMemoryBackend>`](crate::store::generic::GenericTaskStore)
//! behind a zero-argument constructor.
//!
//! # Examples
//!
//! ```
//! use aiwrite_tasks::store::memory::InMemoryTaskStore;
//!
//! let store = InMemoryTaskStore::new().with_cas_retries(16);
//! assert!(store.backend().is_empty());
//! ```

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::{IdempotencyKey, TaskRecord};
use crate::error::TaskError;
use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};
use crate::store::generic::GenericTaskStore;
use crate::types::task::TaskStatus;

use super::{TaskStore, TimingUpdate};

// ---- InMemoryBackend: dumb KV store using DashMap ----

/// Thread-safe in-memory storage backend using [`DashMap`].
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: DashMap<String, (Vec<u8>, u64)>,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        let entry = self.data.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let (data, version) = entry.value();
        Ok(VersionedRecord {
            data: data.clone(),
            version: *version,
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let mut entry = self.data.entry(key.to_string()).or_insert((Vec::new(), 0));
        let value = entry.value_mut();
        value.0 = data.to_vec();
        value.1 += 1;
        Ok(value.1)
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        match self.data.entry(key.to_string()) {
            Entry::Occupied(existing) => Err(StorageError::AlreadyExists {
                key: key.to_string(),
                version: existing.get().1,
            }),
            Entry::Vacant(slot) => {
                slot.insert((data.to_vec(), 1));
                Ok(1)
            },
        }
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let mut entry = self
            .data
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        let current_version = entry.value().1;
        if current_version != expected_version {
            return Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: current_version,
            });
        }
        let new_version = current_version + 1;
        *entry.value_mut() = (data.to_vec(), new_version);
        Ok(new_version)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.remove(key).is_some())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        let mut results: Vec<(String, VersionedRecord)> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| {
                let (data, version) = entry.value();
                (
                    entry.key().clone(),
                    VersionedRecord {
                        data: data.clone(),
                        version: *version,
                    },
                )
            })
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }
}

// ---- InMemoryTaskStore: thin wrapper around GenericTaskStore<InMemoryBackend> ----

/// In-memory Task Registry.
#[derive(Debug)]
pub struct InMemoryTaskStore {
    inner: GenericTaskStore<InMemoryBackend>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: GenericTaskStore::new(InMemoryBackend::new()),
        }
    }

    /// Sets how many times a conflicting write is re-attempted.
    pub fn with_cas_retries(mut self, retries: usize) -> Self {
        self.inner = self.inner.with_cas_retries(retries);
        self
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &InMemoryBackend {
        self.inner.backend()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(
        &self,
        key: &IdempotencyKey,
        parent_id: Option<&str>,
        supersede: Option<&str>,
    ) -> Result<TaskRecord, TaskError> {
        self.inner.create(key, parent_id, supersede).await
    }

    async fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.inner.get(task_id).await
    }

    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<TaskRecord>, TaskError> {
        self.inner.find_by_key(key).await
    }

    async fn list_by_scope(&self, scope_id: &str) -> Result<Vec<TaskRecord>, TaskError> {
        self.inner.list_by_scope(scope_id).await
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.inner.update_status(task_id, status, message).await
    }

    async fn update_progress(
        &self,
        task_id: &str,
        progress: u8,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.inner.update_progress(task_id, progress, message).await
    }

    async fn update_timing(
        &self,
        task_id: &str,
        timing: TimingUpdate,
    ) -> Result<TaskRecord, TaskError> {
        self.inner.update_timing(task_id, timing).await
    }

    async fn cancel(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.inner.cancel(task_id).await
    }
}
