//! Additional unit tests for lifecycle transitions

use redis_operator::controller::state_machine::{
    LifecycleEvent, LifecycleStateMachine, TransitionContext, TransitionResult, readiness_event,
};
use redis_operator::crd::DatabasePhase;

const ALL_PHASES: [DatabasePhase; 7] = [
    DatabasePhase::Creating,
    DatabasePhase::Running,
    DatabasePhase::Pausing,
    DatabasePhase::Dormant,
    DatabasePhase::Resuming,
    DatabasePhase::WipeOut,
    DatabasePhase::Failed,
];

const ALL_EVENTS: [LifecycleEvent; 8] = [
    LifecycleEvent::AllReplicasReady,
    LifecycleEvent::ReplicasNotReady,
    LifecycleEvent::ReconcileError,
    LifecycleEvent::RecoveryInitiated,
    LifecycleEvent::PauseRequested,
    LifecycleEvent::SnapshotStored,
    LifecycleEvent::ResumeRequested,
    LifecycleEvent::WipeOutRequested,
];

fn target(result: TransitionResult) -> Option<DatabasePhase> {
    match result {
        TransitionResult::Success { to, .. } => Some(to),
        _ => None,
    }
}

mod transition_context_tests {
    use super::*;

    #[test]
    fn test_new_context() {
        let ctx = TransitionContext::new(2, 3);
        assert_eq!(ctx.ready_replicas, 2);
        assert_eq!(ctx.desired_replicas, 3);
        assert!(!ctx.all_replicas_ready());
    }

    #[test]
    fn test_more_ready_than_desired() {
        // Scale-down in progress
        assert!(TransitionContext::new(4, 3).all_replicas_ready());
    }

    #[test]
    fn test_readiness_event_follows_context() {
        assert_eq!(
            readiness_event(&TransitionContext::new(6, 6)),
            LifecycleEvent::AllReplicasReady
        );
        assert_eq!(
            readiness_event(&TransitionContext::new(0, 6)),
            LifecycleEvent::ReplicasNotReady
        );
    }
}

mod table_tests {
    use super::*;

    #[test]
    fn test_expected_successors() {
        let sm = LifecycleStateMachine::new();
        let ready = TransitionContext::new(3, 3);
        let not_ready = TransitionContext::new(1, 3);

        use DatabasePhase as P;
        use LifecycleEvent as E;

        let cases = [
            (P::Creating, E::AllReplicasReady, ready, P::Running),
            (P::Creating, E::ReconcileError, ready, P::Failed),
            (P::Creating, E::PauseRequested, ready, P::Pausing),
            (P::Running, E::ReplicasNotReady, not_ready, P::Creating),
            (P::Running, E::ReconcileError, ready, P::Failed),
            (P::Running, E::PauseRequested, ready, P::Pausing),
            (P::Failed, E::RecoveryInitiated, ready, P::Creating),
            (P::Failed, E::AllReplicasReady, ready, P::Running),
            (P::Failed, E::PauseRequested, ready, P::Pausing),
            (P::Pausing, E::SnapshotStored, ready, P::Dormant),
            (P::Pausing, E::ReconcileError, ready, P::Failed),
            (P::Dormant, E::ResumeRequested, ready, P::Resuming),
            (P::Dormant, E::WipeOutRequested, ready, P::WipeOut),
            (P::Resuming, E::ReconcileError, ready, P::Failed),
        ];

        for (from, event, ctx, to) in cases {
            assert_eq!(
                target(sm.transition(from, event, &ctx)),
                Some(to),
                "{} --{}-->",
                from,
                event
            );
        }
    }

    #[test]
    fn test_wipe_out_accepts_nothing() {
        let sm = LifecycleStateMachine::new();
        for event in ALL_EVENTS {
            assert!(!sm.can_transition(DatabasePhase::WipeOut, event));
        }
    }

    #[test]
    fn test_dormant_only_resumes_or_wipes() {
        let sm = LifecycleStateMachine::new();
        let mut events = sm.valid_events(DatabasePhase::Dormant);
        events.sort_by_key(|e| e.to_string());
        assert_eq!(
            events,
            vec![LifecycleEvent::ResumeRequested, LifecycleEvent::WipeOutRequested]
        );
    }

    #[test]
    fn test_at_most_one_transition_per_event() {
        let sm = LifecycleStateMachine::new();
        for phase in ALL_PHASES {
            let events = sm.valid_events(phase);
            for event in &events {
                assert_eq!(
                    events.iter().filter(|e| *e == event).count(),
                    1,
                    "{} has duplicate {}",
                    phase,
                    event
                );
            }
        }
    }

    #[test]
    fn test_running_cannot_skip_pausing() {
        let sm = LifecycleStateMachine::new();
        for event in ALL_EVENTS {
            let ctx = TransitionContext::new(3, 3);
            let to = target(sm.transition(DatabasePhase::Running, event, &ctx));
            assert_ne!(to, Some(DatabasePhase::Dormant));
            assert_ne!(to, Some(DatabasePhase::WipeOut));
        }
    }

    #[test]
    fn test_invalid_transition_reports_current_phase() {
        let sm = LifecycleStateMachine::new();
        assert_eq!(
            sm.transition(
                DatabasePhase::Resuming,
                LifecycleEvent::SnapshotStored,
                &TransitionContext::default()
            ),
            TransitionResult::InvalidTransition {
                current: DatabasePhase::Resuming,
                event: LifecycleEvent::SnapshotStored,
            }
        );
    }
}

mod guard_tests {
    use super::*;

    #[test]
    fn test_running_requires_every_pod() {
        let sm = LifecycleStateMachine::new();
        for from in [DatabasePhase::Creating, DatabasePhase::Failed] {
            let ctx = TransitionContext::new(5, 6);
            let result = sm.transition(from, LifecycleEvent::AllReplicasReady, &ctx);
            match result {
                TransitionResult::GuardFailed { to, reason, .. } => {
                    assert_eq!(to, DatabasePhase::Running);
                    assert_eq!(reason, "Not all pods ready: 5/6");
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn test_not_ready_requires_missing_pod() {
        let sm = LifecycleStateMachine::new();
        let result = sm.transition(
            DatabasePhase::Running,
            LifecycleEvent::ReplicasNotReady,
            &TransitionContext::new(3, 3),
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
    }

    #[test]
    fn test_unguarded_transitions_ignore_readiness() {
        let sm = LifecycleStateMachine::new();
        let result = sm.transition(
            DatabasePhase::Running,
            LifecycleEvent::PauseRequested,
            &TransitionContext::new(0, 3),
        );
        assert_eq!(target(result), Some(DatabasePhase::Pausing));
    }
}

mod lifecycle_path_tests {
    use super::*;

    #[test]
    fn test_full_pause_resume_cycle() {
        let sm = LifecycleStateMachine::new();
        let ready = TransitionContext::new(1, 1);

        let mut phase = DatabasePhase::Creating;
        for event in [
            LifecycleEvent::AllReplicasReady,
            LifecycleEvent::PauseRequested,
            LifecycleEvent::SnapshotStored,
            LifecycleEvent::ResumeRequested,
        ] {
            phase = target(sm.transition(phase, event, &ready)).unwrap();
        }
        assert_eq!(phase, DatabasePhase::Resuming);
    }

    #[test]
    fn test_failure_and_recovery() {
        let sm = LifecycleStateMachine::new();
        let ctx = TransitionContext::new(2, 2);

        let step = |from, event| target(sm.transition(from, event, &ctx)).unwrap();

        let failed = step(DatabasePhase::Running, LifecycleEvent::ReconcileError);
        let recovering = step(failed, LifecycleEvent::RecoveryInitiated);
        let running = step(recovering, LifecycleEvent::AllReplicasReady);
        assert_eq!(
            (failed, recovering, running),
            (DatabasePhase::Failed, DatabasePhase::Creating, DatabasePhase::Running)
        );
    }
}
