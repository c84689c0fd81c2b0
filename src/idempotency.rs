//! Idempotency Resolver: at most one live task per semantic unit of work.
//!
//! ## Protocol
//!
//! 1. The caller derives an [`IdempotencyKey`] from scope + kind + sub-scope.
//! 2. [`IdempotencyResolver::resolve`] reads the task bound to the key:
//!    - live (`queued`, `running`, `canceling`): reuse it, never duplicate
//!    - `succeeded` and mode [`ResolveMode::Reuse`]: reuse it, no re-execution
//!    - `failed` / `canceled` under `Reuse`, or any terminal task under
//!      [`ResolveMode::Regenerate`]: permission to create, superseding it
//!    - nothing bound: permission to create
//! 3. [`IdempotencyResolver::claim`] acts on the decision. Creation binds the
//!    key atomically in the registry; a caller that loses the race gets
//!    [`TaskError::KeyConflict`] internally and re-resolves, ending up with
//!    the winner's task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{IdempotencyKey, TaskRecord};
use crate::error::TaskError;
use crate::store::TaskStore;
use crate::types::task::TaskStatus;

/// Resolve attempts before a contended key is reported as a conflict.
const MAX_CLAIM_ATTEMPTS: usize = 8;

/// What the caller wants when a terminal task already holds the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    /// Return a succeeded task as-is.
    #[default]
    Reuse,
    /// Run again, superseding any terminal task.
    Regenerate,
}

/// Outcome of [`IdempotencyResolver::resolve`].
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Use this existing task.
    Reuse(TaskRecord),
    /// Create a new task; `supersede` names the terminal task it replaces.
    Create {
        /// Task currently bound to the key, if any.
        supersede: Option<String>,
    },
}

/// Result of [`IdempotencyResolver::claim`].
#[derive(Debug, Clone)]
pub struct Claim {
    /// The task the caller should report.
    pub record: TaskRecord,
    /// `true` if this call created it (and must schedule it).
    pub created: bool,
}

/// Resolves idempotency keys against the Task Registry.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use aiwrite_tasks::domain::IdempotencyKey;
/// use aiwrite_tasks::idempotency::{IdempotencyResolver, ResolveMode};
/// use aiwrite_tasks::store::memory::InMemoryTaskStore;
/// use aiwrite_tasks::TaskKind;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let resolver = IdempotencyResolver::new(Arc::new(InMemoryTaskStore::new()));
/// let key = IdempotencyKey::new("P1", TaskKind::Outline, None);
///
/// let first = resolver.claim(&key, ResolveMode::Reuse, None).await.unwrap();
/// let second = resolver.claim(&key, ResolveMode::Reuse, None).await.unwrap();
/// assert!(first.created);
/// assert!(!second.created);
/// assert_eq!(first.record.task_id(), second.record.task_id());
/// # });
/// ```
#[derive(Clone)]
pub struct IdempotencyResolver {
    store: Arc<dyn TaskStore>,
}

impl std::fmt::Debug for IdempotencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyResolver").finish_non_exhaustive()
    }
}

impl IdempotencyResolver {
    /// Creates a resolver over `store`.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Decides whether `key` maps to an existing task or a new one.
    ///
    /// # Errors
    ///
    /// Propagates registry read failures.
    pub async fn resolve(
        &self,
        key: &IdempotencyKey,
        mode: ResolveMode,
    ) -> Result<Resolution, TaskError> {
        let Some(existing) = self.store.find_by_key(key).await? else {
            return Ok(Resolution::Create { supersede: None });
        };

        let status = existing.status();
        let reuse = status.is_live() || (status == TaskStatus::Succeeded && mode == ResolveMode::Reuse);
        if reuse {
            tracing::debug!(key = %key, task_id = existing.task_id(), status = %status, "reusing task");
            return Ok(Resolution::Reuse(existing));
        }

        Ok(Resolution::Create {
            supersede: Some(existing.task_id().to_string()),
        })
    }

    /// Resolves `key` and creates the task when permitted.
    ///
    /// # Errors
    ///
    /// - [`TaskError::KeyConflict`] if the key stayed contended for every
    ///   attempt.
    /// - Registry failures.
    pub async fn claim(
        &self,
        key: &IdempotencyKey,
        mode: ResolveMode,
        parent_id: Option<&str>,
    ) -> Result<Claim, TaskError> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let supersede = match self.resolve(key, mode).await? {
                Resolution::Reuse(record) => {
                    return Ok(Claim {
                        record,
                        created: false,
                    })
                },
                Resolution::Create { supersede } => supersede,
            };

            match self.store.create(key, parent_id, supersede.as_deref()).await {
                Ok(record) => {
                    return Ok(Claim {
                        record,
                        created: true,
                    })
                },
                Err(TaskError::KeyConflict { .. }) => {
                    tracing::debug!(key = %key, "lost key binding race, re-resolving");
                },
                Err(err) => return Err(err),
            }
        }

        Err(TaskError::KeyConflict {
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryTaskStore;
    use crate::types::task::TaskKind;

    fn setup() -> (Arc<InMemoryTaskStore>, IdempotencyResolver) {
        let store = Arc::new(InMemoryTaskStore::new());
        (store.clone(), IdempotencyResolver::new(store))
    }

    async fn finish(store: &InMemoryTaskStore, task_id: &str, status: TaskStatus) {
        store
            .update_status(task_id, TaskStatus::Running, None)
            .await
            .unwrap();
        store
            .update_status(task_id, status, Some("done".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unbound_key_grants_creation() {
        let (_, resolver) = setup();
        let key = IdempotencyKey::new("P1", TaskKind::Abstract, None);
        assert!(matches!(
            resolver.resolve(&key, ResolveMode::Reuse).await.unwrap(),
            Resolution::Create { supersede: None }
        ));
    }

    #[tokio::test]
    async fn succeeded_task_is_reused_unless_regenerating() {
        let (store, resolver) = setup();
        let key = IdempotencyKey::new("P1", TaskKind::Abstract, None);
        let first = resolver.claim(&key, ResolveMode::Reuse, None).await.unwrap();
        finish(&store, first.record.task_id(), TaskStatus::Succeeded).await;

        let reused = resolver.claim(&key, ResolveMode::Reuse, None).await.unwrap();
        assert!(!reused.created);
        assert_eq!(reused.record.task_id(), first.record.task_id());

        let regenerated = resolver
            .claim(&key, ResolveMode::Regenerate, None)
            .await
            .unwrap();
        assert!(regenerated.created);
        assert_ne!(regenerated.record.task_id(), first.record.task_id());
        assert_eq!(store.list_by_scope("P1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_task_is_superseded_even_in_reuse_mode() {
        let (store, resolver) = setup();
        let key = IdempotencyKey::new("P1", TaskKind::Outline, None);
        let first = resolver.claim(&key, ResolveMode::Reuse, None).await.unwrap();
        finish(&store, first.record.task_id(), TaskStatus::Failed).await;

        match resolver.resolve(&key, ResolveMode::Reuse).await.unwrap() {
            Resolution::Create { supersede } => {
                assert_eq!(supersede.as_deref(), Some(first.record.task_id()))
            },
            Resolution::Reuse(_) => panic!("failed task must not be reused"),
        }
    }

    #[tokio::test]
    async fn live_task_is_reused_even_when_regenerating() {
        let (_, resolver) = setup();
        let key = IdempotencyKey::new("P1", TaskKind::Draft, Some("ch1"));
        let first = resolver.claim(&key, ResolveMode::Reuse, None).await.unwrap();
        let again = resolver
            .claim(&key, ResolveMode::Regenerate, None)
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.record.task_id(), first.record.task_id());
    }
}
