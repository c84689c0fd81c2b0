//! Property-based tests and fuzz deserialization tests using proptest.
//!
//! Property tests verify registry invariants under arbitrary operation
//! sequences, idempotency key identity, retry schedule bounds and estimator
//! arithmetic. Fuzz tests verify that snapshots and events handle arbitrary
//! JSON without panicking.

use proptest::prelude::*;
use serde_json::Value;

use aiwrite_tasks::domain::IdempotencyKey;
use aiwrite_tasks::estimator::{EstimatorConfig, ProgressEstimator};
use aiwrite_tasks::gateway::RetryConfig;
use aiwrite_tasks::store::memory::InMemoryTaskStore;
use aiwrite_tasks::store::TaskStore;
use aiwrite_tasks::{Event, Task, TaskKind, TaskStatus};

// ─── Arbitrary Strategies ───────────────────────────────────────────────────

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn arb_kind() -> impl Strategy<Value = TaskKind> {
    prop::sample::select(TaskKind::ALL.to_vec())
}

#[derive(Debug, Clone)]
enum Op {
    Status(TaskStatus),
    Progress(u8),
    Cancel,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        arb_status().prop_map(Op::Status),
        (0u8..=120).prop_map(Op::Progress),
        Just(Op::Cancel),
    ]
}

// ─── Registry invariants ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn registry_never_leaves_a_terminal_state_and_progress_never_drops(
        ops in prop::collection::vec(arb_op(), 1..30)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryTaskStore::new();
            let key = IdempotencyKey::new("P1", TaskKind::Outline, None);
            let record = store.create(&key, None, None).await.unwrap();
            let id = record.task_id().to_string();

            let mut status = record.status();
            let mut progress = 0u8;
            for op in ops {
                let result = match op {
                    Op::Status(next) => store.update_status(&id, next, None).await,
                    Op::Progress(p) => store.update_progress(&id, p, None).await,
                    Op::Cancel => store.cancel(&id).await,
                };
                let current = store.get(&id).await.unwrap();

                if status.is_terminal() {
                    prop_assert!(result.is_err() || current.status() == status);
                    prop_assert_eq!(current.status(), status);
                }
                prop_assert!(current.task.progress >= progress);
                prop_assert!(current.task.progress <= 100);
                if current.status() == TaskStatus::Failed {
                    prop_assert!(current.task.message.is_some());
                }
                if current.status() == TaskStatus::Succeeded {
                    prop_assert_eq!(current.task.progress, 100);
                }

                status = current.status();
                progress = current.task.progress;
            }
            Ok(())
        })?;
    }

    #[test]
    fn rejected_transitions_do_not_mutate(
        from_ops in prop::collection::vec(arb_status(), 0..4),
        next in arb_status(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryTaskStore::new();
            let key = IdempotencyKey::new("P1", TaskKind::Export, None);
            let record = store.create(&key, None, None).await.unwrap();
            let id = record.task_id().to_string();
            for status in from_ops {
                let _ = store.update_status(&id, status, None).await;
            }

            let before = store.get(&id).await.unwrap();
            let allowed = before.status().can_transition_to(&next);
            let result = store.update_status(&id, next, None).await;
            let after = store.get(&id).await.unwrap();

            prop_assert_eq!(result.is_ok(), allowed);
            if !allowed {
                prop_assert_eq!(after.version, before.version);
                prop_assert_eq!(after.status(), before.status());
            }
            Ok(())
        })?;
    }
}

// ─── Idempotency keys ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn keys_are_equal_exactly_when_inputs_are(
        scope_a in "[a-zA-Z0-9_-]{1,12}",
        scope_b in "[a-zA-Z0-9_-]{1,12}",
        kind_a in arb_kind(),
        kind_b in arb_kind(),
        sub_a in proptest::option::of("[a-z0-9.]{1,6}"),
        sub_b in proptest::option::of("[a-z0-9.]{1,6}"),
    ) {
        let a = IdempotencyKey::new(&scope_a, kind_a, sub_a.as_deref());
        let b = IdempotencyKey::new(&scope_b, kind_b, sub_b.as_deref());
        let same_inputs = scope_a == scope_b && kind_a == kind_b && sub_a == sub_b;
        prop_assert_eq!(a.to_string() == b.to_string(), same_inputs);
    }
}

// ─── Retry schedule ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn backoff_stays_within_jittered_cap(
        base in 1u64..5_000,
        cap in 5_000u64..120_000,
        jitter in 0.0f64..0.9,
        retry in 1u32..40,
    ) {
        let policy = RetryConfig {
            max_retries: 3,
            base_delay_ms: base,
            max_delay_ms: cap,
            jitter,
        };
        let delay = policy.delay_for(retry).as_millis() as f64;
        prop_assert!(delay <= cap as f64 * (1.0 + jitter) + 1.0);
    }

    #[test]
    fn backoff_without_jitter_is_non_decreasing(
        base in 1u64..5_000,
        retry in 1u32..30,
    ) {
        let policy = RetryConfig {
            max_retries: 3,
            base_delay_ms: base,
            max_delay_ms: 60_000,
            jitter: 0.0,
        };
        prop_assert!(policy.delay_for(retry) <= policy.delay_for(retry + 1));
    }
}

// ─── Estimator ──────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn remaining_is_never_negative(estimated in 0.0f64..10_000.0, elapsed in 0.0f64..20_000.0) {
        let remaining = ProgressEstimator::remaining(estimated, elapsed);
        prop_assert!(remaining >= 0.0);
        prop_assert!(remaining <= estimated);
    }

    #[test]
    fn ewma_stays_between_observations(samples in prop::collection::vec(1.0f64..600.0, 1..20)) {
        let estimator = ProgressEstimator::new(EstimatorConfig::default(), 4);
        let prior = estimator.per_unit_secs(TaskKind::Draft);
        for s in &samples {
            estimator.record_duration(TaskKind::Draft, *s);
        }
        let lo = samples.iter().cloned().fold(prior, f64::min);
        let hi = samples.iter().cloned().fold(prior, f64::max);
        let estimate = estimator.per_unit_secs(TaskKind::Draft);
        prop_assert!(estimate >= lo - 1e-9 && estimate <= hi + 1e-9);
    }

    #[test]
    fn estimate_grows_with_unit_count(units in 1usize..50) {
        let estimator = ProgressEstimator::new(EstimatorConfig::default(), 4);
        prop_assert!(
            estimator.estimate(TaskKind::Refine, units)
                <= estimator.estimate(TaskKind::Refine, units + 1)
        );
    }
}

// ─── Fuzz deserialization ───────────────────────────────────────────────────

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9_ ]{0,20}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map("[a-zA-Z]{1,12}", inner, 0..8)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn arbitrary_json_never_panics_task_or_event_parsing(value in arb_json()) {
        let _ = serde_json::from_value::<Task>(value.clone());
        let _ = serde_json::from_value::<Event>(value.clone());
        let _ = serde_json::from_value::<TaskStatus>(value);
    }

    #[test]
    fn serialized_tasks_parse_back(
        status in arb_status(),
        kind in arb_kind(),
        progress in 0u8..=100,
        message in proptest::option::of("[a-zA-Z0-9 ]{0,40}"),
    ) {
        let key = IdempotencyKey::new("P1", kind, None);
        let mut record = aiwrite_tasks::domain::TaskRecord::new(&key, None);
        record.task.status = status;
        record.task.progress = progress;
        record.task.message = message;

        let json = serde_json::to_string(&record.task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, record.task);
    }
}
