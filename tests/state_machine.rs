//! Task status state machine and registry transition tests.
//!
//! Covers the full 5x5 transition matrix and the registry operations that
//! drive it: registration, launch bookkeeping, terminal transitions, and
//! garbage collection of resolved tasks.

// ─── Transition Matrix ──────────────────────────────────────────────────────

mod transitions {
    use fleet_futures::{TaskId, TaskStatus};

    const VALID: [(TaskStatus, TaskStatus); 6] = [
        (TaskStatus::Pending, TaskStatus::Running),
        (TaskStatus::Pending, TaskStatus::Failed),
        (TaskStatus::Pending, TaskStatus::Cancelled),
        (TaskStatus::Running, TaskStatus::Completed),
        (TaskStatus::Running, TaskStatus::Failed),
        (TaskStatus::Running, TaskStatus::Cancelled),
    ];

    #[test]
    fn only_listed_transitions_are_valid() {
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                let expected = VALID.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(&to),
                    expected,
                    "{from} -> {to} should be {}",
                    if expected { "valid" } else { "invalid" }
                );
            }
        }
    }

    #[test]
    fn pending_cannot_complete_without_running() {
        let err = TaskStatus::Pending
            .validate_transition(&TaskId::from("t1"), &TaskStatus::Completed)
            .unwrap_err();
        assert!(err.to_string().contains("pending"));
        assert!(err.to_string().contains("completed"));
        assert_eq!(err.classification(), "usage");
    }

    #[test]
    fn terminal_statuses_are_final() {
        for from in TaskStatus::ALL.into_iter().filter(TaskStatus::is_terminal) {
            for to in TaskStatus::ALL {
                assert!(!from.can_transition_to(&to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(TaskStatus::Cancelled).unwrap(),
            serde_json::json!("cancelled")
        );
    }
}

// ─── Registry Operations ────────────────────────────────────────────────────

mod registry {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use fleet_futures::executor::WorkerHandle;
    use fleet_futures::registry::{Registration, TaskRegistry};
    use fleet_futures::{
        FailureKind, FleetError, ResourceShape, TaskFailure, TaskId, TaskStatus, WorkDescriptor,
    };

    fn registry_with(ids: &[&str]) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for id in ids {
            registry.register(
                TaskId::from(*id),
                WorkDescriptor::new("square", json!(3)),
                ResourceShape::new(256, 512),
                None,
            );
        }
        registry
    }

    #[test]
    fn reregistering_keeps_the_original_record() {
        let mut registry = registry_with(&["a"]);
        let outcome = registry.register(
            TaskId::from("a"),
            WorkDescriptor::new("other", json!(null)),
            ResourceShape::new(1024, 2048),
            Some(Duration::from_secs(1)),
        );
        assert_eq!(outcome, Registration::Existing);
        assert_eq!(registry.len(), 1);

        let record = registry.get(&TaskId::from("a")).unwrap();
        assert_eq!(record.descriptor.function, "square");
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.timeout, None);
    }

    #[test]
    fn full_lifecycle_stamps_timestamps() {
        let mut registry = registry_with(&["a"]);
        let id = TaskId::from("a");

        assert_eq!(registry.record_launch_attempt(&id, 0).unwrap(), 1);
        registry.mark_running(&id, WorkerHandle::new("w-1", id.clone())).unwrap();
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Running);
        assert!(record.started_at.is_some());
        assert_eq!(record.wave, Some(0));

        registry
            .mark_completed(&id, "results/a".to_string(), Some(Duration::from_secs(42)))
            .unwrap();
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.completed_at.is_some());
        assert!(record.worker.is_none());
        assert_eq!(record.result_ref.as_deref(), Some("results/a"));
        assert_eq!(record.runtime(), Some(Duration::from_secs(42)));
    }

    #[test]
    fn completion_after_cancel_is_rejected() {
        let mut registry = registry_with(&["a"]);
        let id = TaskId::from("a");
        registry.mark_running(&id, WorkerHandle::new("w-1", id.clone())).unwrap();

        let worker = registry.mark_cancelled(&id).unwrap();
        assert_eq!(worker.map(|w| w.worker_id), Some("w-1".to_string()));

        let err = registry
            .mark_completed(&id, "results/a".to_string(), None)
            .unwrap_err();
        assert!(matches!(err, FleetError::InvalidTransition { .. }));
        assert_eq!(registry.status(&id).unwrap(), TaskStatus::Cancelled);
    }

    #[test]
    fn launch_failure_fails_a_pending_task() {
        let mut registry = registry_with(&["a"]);
        let id = TaskId::from("a");
        registry
            .mark_failed(&id, TaskFailure::new(FailureKind::FatalLaunch, "denied"), None)
            .unwrap();
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.started_at, None);
        assert_eq!(record.runtime(), None);
    }

    #[test]
    fn unresolved_lists_only_non_terminal_tasks() {
        let mut registry = registry_with(&["c", "a", "b"]);
        registry.mark_cancelled(&TaskId::from("b")).unwrap();
        assert_eq!(registry.unresolved(), vec![TaskId::from("a"), TaskId::from("c")]);
        assert_eq!(registry.count(TaskStatus::Cancelled), 1);
    }

    #[test]
    fn discard_requires_a_terminal_task() {
        let mut registry = registry_with(&["a"]);
        let id = TaskId::from("a");
        assert!(matches!(
            registry.discard(&id),
            Err(FleetError::NotResolved {
                status: TaskStatus::Pending,
                ..
            })
        ));

        registry.mark_cancelled(&id).unwrap();
        registry.discard(&id).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.get(&id), Err(FleetError::UnknownTask { .. })));
    }
}
