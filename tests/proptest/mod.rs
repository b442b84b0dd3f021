// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for slot partitioning, merge patches, validation and
//! the lifecycle state machine
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Every master count yields a complete, fair slot partition
//! 2. Merge patches always reproduce the modified document
//! 3. Valid specs always validate and render without panicking
//! 4. The state machine never panics and WipeOut is absorbing

#[path = "../common/mod.rs"]
mod common;

use k8s_openapi::api::apps::v1::StatefulSet;
use proptest::prelude::*;
use serde_json::{Map, Value};

use redis_operator::controller::state_machine::{
    LifecycleEvent, LifecycleStateMachine, TransitionContext, TransitionResult,
};
use redis_operator::controller::validation::validate_spec;
use redis_operator::crd::{DatabasePhase, Redis};
use redis_operator::resources::statefulset::statefulset;
use redis_operator::resources::{WorkloadSettings, workload_layouts};
use redis_operator::store::Verb;
use redis_operator::store::patch::{
    apply_merge_patch, create_merge_patch, is_empty_patch, structurally_equal,
};
use redis_operator::topology::{
    ExpectedTopology, TOTAL_SLOTS, TopologyMismatch, check_coverage, expected_partition, slot_owner,
    verify,
};

use common::{RedisBuilder, converged_topology};

// =============================================================================
// Strategies
// =============================================================================

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
        prop::collection::vec(any::<i32>().prop_map(Value::from), 0..3).prop_map(Value::Array),
    ]
}

/// JSON objects without nulls; merge patches cannot express a null value.
/// Keys come from a small alphabet so two documents overlap.
fn arb_document() -> impl Strategy<Value = Value> {
    let value = arb_leaf().prop_recursive(3, 32, 4, |inner| {
        prop::collection::btree_map("[a-d]", inner, 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>()))
    });
    prop::collection::btree_map("[a-e]", value, 0..5)
        .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>()))
}

fn arb_phase() -> impl Strategy<Value = DatabasePhase> {
    prop_oneof![
        Just(DatabasePhase::Creating),
        Just(DatabasePhase::Running),
        Just(DatabasePhase::Pausing),
        Just(DatabasePhase::Dormant),
        Just(DatabasePhase::Resuming),
        Just(DatabasePhase::WipeOut),
        Just(DatabasePhase::Failed),
    ]
}

fn arb_event() -> impl Strategy<Value = LifecycleEvent> {
    prop_oneof![
        Just(LifecycleEvent::AllReplicasReady),
        Just(LifecycleEvent::ReplicasNotReady),
        Just(LifecycleEvent::ReconcileError),
        Just(LifecycleEvent::RecoveryInitiated),
        Just(LifecycleEvent::PauseRequested),
        Just(LifecycleEvent::SnapshotStored),
        Just(LifecycleEvent::ResumeRequested),
        Just(LifecycleEvent::WipeOutRequested),
    ]
}

fn arb_verb() -> impl Strategy<Value = Verb> {
    prop_oneof![Just(Verb::Unchanged), Just(Verb::Created), Just(Verb::Patched)]
}

fn arb_storage() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        (1u32..=512, prop_oneof![Just("Mi"), Just("Gi"), Just("Ti")])
            .prop_map(|(n, unit)| Some(format!("{}{}", n, unit))),
    ]
}

fn arb_monitor_port() -> impl Strategy<Value = Option<Option<i32>>> {
    prop_oneof![
        Just(None),
        Just(Some(None)),
        Just(Some(Some(0))),
        (1024i32..6000).prop_map(|port| Some(Some(port))),
    ]
}

/// Specs that satisfy every validation rule
fn valid_redis() -> impl Strategy<Value = Redis> {
    let topology = prop_oneof![
        Just(None),
        (3i32..=50, 0i32..=5).prop_map(Some),
    ];
    (
        topology,
        "[0-9]\\.[0-9]\\.[0-9]{1,2}",
        arb_storage(),
        arb_monitor_port(),
        any::<bool>(),
    )
        .prop_map(|(topology, version, storage, monitor, tls)| {
            let mut builder = match topology {
                Some((master, replicas)) => RedisBuilder::cluster("cache", "default", master, replicas),
                None => RedisBuilder::new("cache", "default"),
            };
            builder = builder.with_version(&version);
            if let Some(size) = storage {
                builder = builder.with_storage(&size);
            }
            if let Some(port) = monitor {
                builder = builder.with_monitoring(port);
            }
            if tls {
                builder = builder.with_tls("ca-issuer");
            }
            let mut redis = builder.build();
            redis.metadata.uid = Some("uid-cache".to_string());
            redis
        })
}

fn settings() -> WorkloadSettings {
    WorkloadSettings {
        image_registry: "docker.io/library".to_string(),
        governing_service: "kubedb".to_string(),
    }
}

// =============================================================================
// Property-based tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: every slot is owned by exactly one range and sizes differ by
    /// at most one
    #[test]
    fn prop_partition_is_complete_and_fair(masters in 1u32..=TOTAL_SLOTS, slot in 0u16..16384) {
        let ranges = expected_partition(masters).unwrap();
        prop_assert_eq!(ranges.len() as u32, masters);
        prop_assert_eq!(check_coverage(&ranges), Ok(()));
        prop_assert!(slot_owner(slot, &ranges).is_some());

        let sizes: Vec<u32> = ranges.iter().map(|r| r.len()).collect();
        let min = *sizes.iter().min().unwrap();
        let max = *sizes.iter().max().unwrap();
        prop_assert!(min >= 1);
        prop_assert!(max - min <= 1);
        prop_assert_eq!(sizes.iter().sum::<u32>(), TOTAL_SLOTS);
    }

    /// Property: more masters than slots is rejected, not truncated
    #[test]
    fn prop_oversized_partition_rejected(masters in (TOTAL_SLOTS + 1)..100_000u32) {
        prop_assert!(expected_partition(masters).is_err());
    }

    /// Property: a cluster laid out exactly as expected always verifies
    #[test]
    fn prop_converged_cluster_verifies(masters in 1u32..=64, replicas in 0u32..=4) {
        let expected = ExpectedTopology::new(masters, replicas).unwrap();
        prop_assert_eq!(verify(&expected, &converged_topology(masters, replicas)), Ok(()));
    }

    /// Property: a stray node known to the cluster is always reported
    #[test]
    fn prop_stray_nodes_reported(masters in 1u32..=64, replicas in 0u32..=4, extra in 1u32..=3) {
        let expected = ExpectedTopology::new(masters, replicas).unwrap();
        let total = expected.total_nodes();
        let observed = converged_topology(masters, replicas).with_known_nodes(Some(total + extra));
        prop_assert_eq!(
            verify(&expected, &observed),
            Err(TopologyMismatch::NodeCount { expected: total, found: total + extra })
        );
    }

    /// Property: applying the diff of two documents reproduces the second
    #[test]
    fn prop_merge_patch_reproduces_target(a in arb_document(), b in arb_document()) {
        let patch = create_merge_patch(&a, &b);
        let mut patched = a.clone();
        apply_merge_patch(&mut patched, &patch);
        prop_assert_eq!(patched, b);
    }

    /// Property: the patch is empty exactly when the documents are equal
    #[test]
    fn prop_empty_patch_iff_equal(a in arb_document(), b in arb_document()) {
        prop_assert!(is_empty_patch(&create_merge_patch(&a, &a)));
        prop_assert_eq!(structurally_equal(&a, &b).unwrap(), a == b);
    }

    /// Property: folding keeps Created only when every step created
    #[test]
    fn prop_verb_fold(verbs in prop::collection::vec(arb_verb(), 0..6)) {
        let folded = Verb::fold(verbs.iter().copied());
        let expected = if !verbs.is_empty() && verbs.iter().all(|v| *v == Verb::Created) {
            Verb::Created
        } else if verbs.iter().any(|v| *v != Verb::Unchanged) {
            Verb::Patched
        } else {
            Verb::Unchanged
        };
        prop_assert_eq!(folded, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: valid specs always pass validation
    #[test]
    fn prop_valid_spec_passes_validation(redis in valid_redis()) {
        let result = validate_spec(&redis);
        prop_assert!(result.is_ok(), "Valid spec should pass validation: {:?}", result);
    }

    /// Property: validation is deterministic
    #[test]
    fn prop_validation_deterministic(
        redis in valid_redis(),
        replicas in prop::option::of(-2i32..5),
    ) {
        let mut redis = redis;
        redis.spec.replicas = replicas;
        let first = validate_spec(&redis).map_err(|e| e.to_string());
        let second = validate_spec(&redis).map_err(|e| e.to_string());
        prop_assert_eq!(first, second);
    }

    /// Property: valid specs render one workload per shard covering every pod,
    /// and rendering twice changes nothing
    #[test]
    fn prop_valid_spec_renders_idempotently(redis in valid_redis()) {
        let layouts = workload_layouts(&redis).unwrap();
        prop_assert_eq!(layouts.len() as i32, redis.masters());
        prop_assert_eq!(layouts.iter().map(|l| l.replicas).sum::<i32>(), redis.total_pods());

        for layout in &layouts {
            let once = statefulset(&redis, layout, &settings(), StatefulSet::default());
            let twice = statefulset(&redis, layout, &settings(), once.clone());
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(once.spec.as_ref().and_then(|s| s.replicas), Some(layout.replicas));
        }
    }

    /// Property: the state machine never panics, only ever lands in a phase
    /// reachable from the table, and WipeOut is absorbing
    #[test]
    fn prop_state_machine_never_panics(
        start in arb_phase(),
        events in prop::collection::vec((arb_event(), 0i32..4, 0i32..4), 0..30),
    ) {
        let sm = LifecycleStateMachine::new();
        let mut phase = start;

        for (event, ready, desired) in events {
            let ctx = TransitionContext::new(ready, desired);
            match sm.transition(phase, event, &ctx) {
                TransitionResult::Success { from, to, .. } => {
                    prop_assert_eq!(from, phase);
                    prop_assert_ne!(phase, DatabasePhase::WipeOut);
                    prop_assert!(sm.can_transition(phase, event));
                    phase = to;
                }
                TransitionResult::GuardFailed { from, .. } => {
                    prop_assert_eq!(from, phase);
                }
                TransitionResult::InvalidTransition { current, .. } => {
                    prop_assert_eq!(current, phase);
                    prop_assert!(!sm.can_transition(phase, event));
                }
            }
        }
    }
}
