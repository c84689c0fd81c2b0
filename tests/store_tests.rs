//! Integration tests for InMemoryTaskStore.
//!
//! Tests cover creation and key binding, status and progress updates,
//! cancellation requests, scope listing, and concurrent access patterns.
//! Organized into module blocks per concern.

use std::sync::Arc;

use aiwrite_tasks::domain::IdempotencyKey;
use aiwrite_tasks::store::{InMemoryTaskStore, TaskStore, TimingUpdate};
use aiwrite_tasks::{TaskError, TaskKind, TaskStatus};

fn outline_key(scope: &str) -> IdempotencyKey {
    IdempotencyKey::new(scope, TaskKind::Outline, None)
}

fn draft_key(scope: &str, section: &str) -> IdempotencyKey {
    IdempotencyKey::new(scope, TaskKind::Draft, Some(section))
}

// ─── Creation ───────────────────────────────────────────────────────────────

mod create_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn create_returns_queued_task() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        assert_eq!(record.status(), TaskStatus::Queued);
        assert_eq!(record.task.progress, 0);
        assert_eq!(record.task.scope_id, "P1");
        assert!(record.started_at.is_none());

        let parsed = uuid::Uuid::parse_str(record.task_id()).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[tokio::test]
    async fn create_binds_the_key() {
        let store = InMemoryTaskStore::new();
        let key = draft_key("P1", "ch2");
        let record = store.create(&key, Some("parent"), None).await.unwrap();

        let found = store.find_by_key(&key).await.unwrap().unwrap();
        assert_eq!(found.task_id(), record.task_id());
        assert_eq!(found.task.parent_id.as_deref(), Some("parent"));
        assert_eq!(found.task.sub_scope_id.as_deref(), Some("ch2"));
    }

    #[tokio::test]
    async fn second_create_on_bound_key_conflicts() {
        let store = InMemoryTaskStore::new();
        let key = outline_key("P1");
        store.create(&key, None, None).await.unwrap();

        let err = store.create(&key, None, None).await.unwrap_err();
        assert!(matches!(err, TaskError::KeyConflict { .. }));
        // The loser left nothing behind.
        assert_eq!(store.list_by_scope("P1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn supersede_requires_terminal_predecessor() {
        let store = InMemoryTaskStore::new();
        let key = outline_key("P1");
        let first = store.create(&key, None, None).await.unwrap();

        let err = store
            .create(&key, None, Some(first.task_id()))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::KeyConflict { .. }));

        store
            .update_status(first.task_id(), TaskStatus::Running, None)
            .await
            .unwrap();
        store
            .update_status(first.task_id(), TaskStatus::Succeeded, None)
            .await
            .unwrap();

        let second = store
            .create(&key, None, Some(first.task_id()))
            .await
            .unwrap();
        let bound = store.find_by_key(&key).await.unwrap().unwrap();
        assert_eq!(bound.task_id(), second.task_id());
        // The superseded task is kept.
        assert_eq!(
            store.get(first.task_id()).await.unwrap().status(),
            TaskStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn supersede_of_a_stale_pointer_conflicts() {
        let store = InMemoryTaskStore::new();
        let key = outline_key("P1");
        store.create(&key, None, None).await.unwrap();

        let err = store
            .create(&key, None, Some("someone-else"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::KeyConflict { .. }));
    }

    #[tokio::test]
    async fn find_by_unbound_key_is_none() {
        let store = InMemoryTaskStore::new();
        assert!(store
            .find_by_key(&outline_key("nowhere"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let store = InMemoryTaskStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { task_id } if task_id == "missing"));
    }
}

// ─── Status and progress ────────────────────────────────────────────────────

mod update_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn running_stamps_start_and_success_sets_full_progress() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let id = record.task_id();

        let running = store
            .update_status(id, TaskStatus::Running, None)
            .await
            .unwrap();
        assert!(running.started_at.is_some());

        let done = store
            .update_status(id, TaskStatus::Succeeded, Some("outlined".into()))
            .await
            .unwrap();
        assert_eq!(done.task.progress, 100);
        assert_eq!(done.task.remaining_secs, Some(0.0));
        assert_eq!(done.task.message.as_deref(), Some("outlined"));
    }

    #[tokio::test]
    async fn failed_task_always_has_a_message() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let id = record.task_id();
        store
            .update_status(id, TaskStatus::Running, None)
            .await
            .unwrap();

        let failed = store
            .update_status(id, TaskStatus::Failed, Some("  ".into()))
            .await
            .unwrap();
        let message = failed.task.message.unwrap();
        assert!(!message.trim().is_empty());
    }

    #[tokio::test]
    async fn illegal_transition_leaves_record_untouched() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let id = record.task_id();

        let err = store
            .update_status(id, TaskStatus::Succeeded, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));

        let after = store.get(id).await.unwrap();
        assert_eq!(after.status(), TaskStatus::Queued);
        assert_eq!(after.version, record.version);
    }

    #[tokio::test]
    async fn progress_is_monotonic() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let id = record.task_id();
        store
            .update_status(id, TaskStatus::Running, None)
            .await
            .unwrap();

        store.update_progress(id, 40, None).await.unwrap();
        store.update_progress(id, 40, None).await.unwrap();
        let err = store.update_progress(id, 39, None).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::ProgressRegression {
                current: 40,
                requested: 39,
                ..
            }
        ));

        let err = store.update_progress(id, 101, None).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidProgress { value: 101, .. }));
        assert_eq!(store.get(id).await.unwrap().task.progress, 40);
    }

    #[tokio::test]
    async fn progress_requires_running() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let err = store
            .update_progress(record.task_id(), 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn timing_floors_at_zero_and_ignores_terminal_tasks() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let id = record.task_id();

        let updated = store
            .update_timing(
                id,
                TimingUpdate {
                    estimated_secs: Some(60.0),
                    remaining_secs: Some(-5.0),
                    ..TimingUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.task.estimated_secs, Some(60.0));
        assert_eq!(updated.task.remaining_secs, Some(0.0));

        store
            .update_status(id, TaskStatus::Running, None)
            .await
            .unwrap();
        store
            .update_status(id, TaskStatus::Succeeded, None)
            .await
            .unwrap();
        let frozen = store
            .update_timing(
                id,
                TimingUpdate {
                    estimated_secs: Some(999.0),
                    ..TimingUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(frozen.task.estimated_secs, Some(60.0));
    }
}

// ─── Cancellation ───────────────────────────────────────────────────────────

mod cancel_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn cancel_moves_live_task_to_canceling() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let canceling = store.cancel(record.task_id()).await.unwrap();
        assert_eq!(canceling.status(), TaskStatus::Canceling);

        // Repeated requests are acknowledged without change.
        let again = store.cancel(record.task_id()).await.unwrap();
        assert_eq!(again.version, canceling.version);

        let canceled = store
            .update_status(record.task_id(), TaskStatus::Canceled, None)
            .await
            .unwrap();
        assert_eq!(canceled.status(), TaskStatus::Canceled);
    }

    #[tokio::test]
    async fn cancel_of_terminal_task_is_rejected() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let id = record.task_id();
        store
            .update_status(id, TaskStatus::Running, None)
            .await
            .unwrap();
        store
            .update_status(id, TaskStatus::Succeeded, None)
            .await
            .unwrap();

        let err = store.cancel(id).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn canceling_task_cannot_succeed() {
        let store = InMemoryTaskStore::new();
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let id = record.task_id();
        store
            .update_status(id, TaskStatus::Running, None)
            .await
            .unwrap();
        store.cancel(id).await.unwrap();

        let err = store
            .update_status(id, TaskStatus::Succeeded, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }
}

// ─── Listing ────────────────────────────────────────────────────────────────

mod list_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn list_is_scoped() {
        let store = InMemoryTaskStore::new();
        store.create(&outline_key("P1"), None, None).await.unwrap();
        store.create(&draft_key("P1", "ch1"), None, None).await.unwrap();
        store.create(&outline_key("P2"), None, None).await.unwrap();

        assert_eq!(store.list_by_scope("P1").await.unwrap().len(), 2);
        assert_eq!(store.list_by_scope("P2").await.unwrap().len(), 1);
        assert!(store.list_by_scope("P3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scope_prefixes_do_not_leak() {
        let store = InMemoryTaskStore::new();
        store.create(&outline_key("P1"), None, None).await.unwrap();
        store.create(&outline_key("P10"), None, None).await.unwrap();
        assert_eq!(store.list_by_scope("P1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let store = InMemoryTaskStore::new();
        let first = store.create(&outline_key("P1"), None, None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create(&draft_key("P1", "ch1"), None, None).await.unwrap();

        let ids: Vec<_> = store
            .list_by_scope("P1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.task.task_id)
            .collect();
        assert_eq!(ids, vec![first.task.task_id, second.task.task_id]);
    }
}

// ─── Concurrency ────────────────────────────────────────────────────────────

mod concurrency_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn concurrent_creates_bind_one_task() {
        let store = Arc::new(InMemoryTaskStore::new());
        let key = outline_key("P1");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move { store.create(&key, None, None).await }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => assert!(err.is_contention(), "{err}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.list_by_scope("P1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_progress_updates_are_not_lost() {
        let store = Arc::new(InMemoryTaskStore::new().with_cas_retries(64));
        let record = store.create(&outline_key("P1"), None, None).await.unwrap();
        let id = record.task_id().to_string();
        store
            .update_status(&id, TaskStatus::Running, None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for p in 1..=20u8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                // Lower values may lose the race to higher ones.
                let _ = store.update_progress(&id, p * 5, None).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(&id).await.unwrap().task.progress, 100);
    }
}
