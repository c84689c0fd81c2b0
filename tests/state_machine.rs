//! State machine transition tests.
//!
//! Covers the full 6x6 transition matrix of `TaskStatus`: which moves are
//! accepted, which are rejected, and the hints attached to rejections.

// Imports are in sub-modules to avoid ambiguity with pretty_assertions.

// ─── Terminal and live classification ───────────────────────────────────────

mod classification {
    use aiwrite_tasks::TaskStatus;

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn live_states() {
        assert!(TaskStatus::Queued.is_live());
        assert!(TaskStatus::Running.is_live());
        assert!(TaskStatus::Canceling.is_live());
    }
}

// ─── Full matrix ────────────────────────────────────────────────────────────

mod matrix {
    use std::collections::HashSet;

    use aiwrite_tasks::TaskStatus;
    use pretty_assertions::assert_eq;

    const ALLOWED: [(TaskStatus, TaskStatus); 7] = [
        (TaskStatus::Queued, TaskStatus::Running),
        (TaskStatus::Queued, TaskStatus::Canceling),
        (TaskStatus::Running, TaskStatus::Running),
        (TaskStatus::Running, TaskStatus::Succeeded),
        (TaskStatus::Running, TaskStatus::Failed),
        (TaskStatus::Running, TaskStatus::Canceling),
        (TaskStatus::Canceling, TaskStatus::Canceled),
    ];

    #[test]
    fn exactly_the_allowed_moves_are_accepted() {
        let mut accepted = HashSet::new();
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                if from.can_transition_to(&to) {
                    accepted.insert((from, to));
                }
            }
        }
        let expected: HashSet<_> = ALLOWED.into_iter().collect();
        assert_eq!(accepted.len(), ALLOWED.len());
        assert_eq!(accepted, expected);
    }

    #[test]
    fn validate_agrees_with_can_transition() {
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                assert_eq!(
                    from.validate_transition("t1", &to).is_ok(),
                    from.can_transition_to(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn queued_cannot_finish_without_running() {
        assert!(!TaskStatus::Queued.can_transition_to(&TaskStatus::Succeeded));
        assert!(!TaskStatus::Queued.can_transition_to(&TaskStatus::Failed));
        assert!(!TaskStatus::Queued.can_transition_to(&TaskStatus::Canceled));
    }

    #[test]
    fn canceling_only_acknowledges() {
        for to in TaskStatus::ALL {
            assert_eq!(
                TaskStatus::Canceling.can_transition_to(&to),
                to == TaskStatus::Canceled
            );
        }
    }
}

// ─── Rejection details ──────────────────────────────────────────────────────

mod rejections {
    use aiwrite_tasks::{TaskError, TaskStatus};

    fn hint(from: TaskStatus, to: TaskStatus) -> Option<String> {
        match from.validate_transition("t1", &to) {
            Err(TaskError::InvalidTransition {
                task_id,
                from: f,
                to: t,
                suggested_action,
            }) => {
                assert_eq!(task_id, "t1");
                assert_eq!(f, from);
                assert_eq!(t, to);
                suggested_action
            },
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn terminal_rejection_suggests_regenerate() {
        for from in [TaskStatus::Succeeded, TaskStatus::Failed, TaskStatus::Canceled] {
            let action = hint(from, TaskStatus::Running).unwrap();
            assert!(action.contains("regenerate"), "{action}");
        }
    }

    #[test]
    fn canceling_rejection_names_the_acknowledgement() {
        let action = hint(TaskStatus::Canceling, TaskStatus::Succeeded).unwrap();
        assert!(action.contains("cancel"));
    }

    #[test]
    fn self_transition_rejection() {
        let action = hint(TaskStatus::Queued, TaskStatus::Queued).unwrap();
        assert!(action.contains("already queued"));
    }

    #[test]
    fn rejection_is_a_caller_error() {
        let err = TaskStatus::Failed
            .validate_transition("t1", &TaskStatus::Succeeded)
            .unwrap_err();
        assert_eq!(err.error_code(), -32602);
        assert!(!err.is_contention());
    }
}
