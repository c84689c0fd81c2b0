//! Low-level key-value storage backend trait and supporting types.
//!
//! The [`StorageBackend`] trait is the contract every storage engine
//! implements: [`get`](StorageBackend::get), [`put`](StorageBackend::put),
//! [`put_if_absent`](StorageBackend::put_if_absent),
//! [`put_if_version`](StorageBackend::put_if_version),
//! [`delete`](StorageBackend::delete) and
//! [`list_by_prefix`](StorageBackend::list_by_prefix).
//!
//! Domain logic (state machine validation, idempotency key binding,
//! serialization) does **not** belong here. Backends are dumb KV stores;
//! domain logic lives in `GenericTaskStore`.
//!
//! # Key Structure
//!
//! ```text
//! task/{task_id}            serialized TaskRecord
//! scope/{scope_id}/{task_id} empty index entry, one per task in a scope
//! key/{idempotency_key}     task_id currently bound to the key
//! ```
//!
//! Scope ids are validated to contain no `/` or `:`, and task ids are
//! UUIDv4 strings, so prefix listing on `scope/{scope_id}/` is exact.
//!
//! # Versioning
//!
//! Each stored value carries a monotonic `u64` version starting at 1,
//! incremented on every successful write.

use async_trait::async_trait;
use thiserror::Error;

/// A stored value paired with its monotonic version number.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::store::backend::VersionedRecord;
///
/// let record = VersionedRecord {
///     data: b"{}".to_vec(),
///     version: 1,
/// };
/// assert_eq!(record.version, 1);
/// ```
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// The stored bytes.
    pub data: Vec<u8>,

    /// Monotonic version number. Starts at 1.
    pub version: u64,
}

/// Errors that can occur during raw storage operations.
///
/// `GenericTaskStore` maps them to [`TaskError`](crate::error::TaskError)
/// variants before surfacing to callers.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::store::backend::StorageError;
///
/// let err = StorageError::VersionConflict {
///     key: "task/t-1".to_string(),
///     expected: 2,
///     actual: 3,
/// };
/// assert!(err.to_string().contains("expected 2"));
/// ```
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key was not found.
    #[error("key not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// A [`put_if_absent`](StorageBackend::put_if_absent) found the key taken.
    #[error("key already exists: {key} (version {version})")]
    AlreadyExists {
        /// The contested key.
        key: String,
        /// Version of the value already stored.
        version: u64,
    },

    /// A [`put_if_version`](StorageBackend::put_if_version) found a
    /// different version than expected.
    #[error("version conflict on key {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The key where the conflict occurred.
        key: String,
        /// The version the caller expected.
        expected: u64,
        /// The actual version found in storage.
        actual: u64,
    },

    /// An I/O or backend-specific failure.
    #[error("backend error: {message}")]
    Backend {
        /// Human-readable description.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Key-value storage backend for the task registry.
///
/// Implementations must be `Send + Sync`; the registry is shared across
/// every worker in the pool.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the key does not exist.
    /// - [`StorageError::Backend`] on backend failures.
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError>;

    /// Stores a value unconditionally and returns the new version.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on backend failures.
    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Stores a value only if the key does not exist yet (version 1).
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlreadyExists`] if the key is taken.
    /// - [`StorageError::Backend`] on backend failures.
    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Compare-and-swap: stores a value only if the current version equals
    /// `expected_version`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the key does not exist.
    /// - [`StorageError::VersionConflict`] on a version mismatch.
    /// - [`StorageError::Backend`] on backend failures.
    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Deletes a key. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on backend failures.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Lists every `(key, value)` whose key starts with `prefix`, sorted by key.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on backend failures.
    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError>;
}

/// Storage key of a task record.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::store::backend::task_key;
///
/// assert_eq!(task_key("t-1"), "task/t-1");
/// ```
pub fn task_key(task_id: &str) -> String {
    format!("task/{task_id}")
}

/// Storage key of a scope index entry.
pub fn scope_index_key(scope_id: &str, task_id: &str) -> String {
    format!("scope/{scope_id}/{task_id}")
}

/// Prefix listing every index entry of a scope.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::store::backend::{scope_index_key, scope_prefix};
///
/// let prefix = scope_prefix("P1");
/// assert!(scope_index_key("P1", "t-1").starts_with(&prefix));
/// assert!(!scope_index_key("P10", "t-1").starts_with(&prefix));
/// ```
pub fn scope_prefix(scope_id: &str) -> String {
    format!("scope/{scope_id}/")
}

/// Storage key of an idempotency key pointer.
pub fn idempotency_pointer_key(key: &str) -> String {
    format!("key/{key}")
}
