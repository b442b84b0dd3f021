//! Pause, resume and wipe-out through DormantDatabase records

use std::time::Duration;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::core::ObjectMeta;

use redis_operator::crd::{DatabaseKind, DatabasePhase, LABEL_DATABASE_KIND, Redis};
use redis_operator::events::reasons;
use redis_operator::resources::selector_labels;

use crate::common::{RedisBuilder, TestEnv, dormant_record, sorted_names};

fn dormant_phase(env: &TestEnv, name: &str) -> Option<DatabasePhase> {
    env.dormant("default", name)
        .and_then(|d| d.status)
        .and_then(|s| s.phase)
}

/// Provision `redis`, bring it to Running, delete it and let its owned
/// dependents be collected.
async fn run_then_delete(env: &TestEnv, redis: &Redis) {
    env.seed(redis);
    env.reconcile("default", "cache").await;
    env.mark_ready("default").await;
    env.reconcile("default", "cache").await;
    env.delete_redis("default", "cache").await;
    env.reconcile("default", "cache").await;
    env.collect_garbage("default").await;
}

mod pause_tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_leaves_dormant_snapshot() {
        let env = TestEnv::new();
        let redis = RedisBuilder::new("cache", "default").with_label("team", "core").build();
        run_then_delete(&env, &redis).await;

        assert!(env.redis("default", "cache").is_none());
        let dormant = env.dormant("default", "cache").unwrap();
        assert_eq!(dormant.spec.origin.metadata.name, "cache");
        assert_eq!(dormant.spec.origin.metadata.namespace, "default");
        assert_eq!(dormant.spec.origin.metadata.labels.get("team"), Some(&"core".to_string()));
        assert_eq!(dormant.spec.origin.spec.redis.as_ref(), Some(&redis.spec));
        assert_eq!(
            dormant.metadata.labels.as_ref().and_then(|l| l.get(LABEL_DATABASE_KIND)),
            Some(&"Redis".to_string())
        );

        let status = dormant.status.unwrap();
        assert_eq!(status.phase, Some(DatabasePhase::Dormant));
        assert!(status.pausing_time.is_some());
        assert_eq!(
            env.messages(reasons::SUCCESSFUL_CREATE),
            vec![r#"Successfully created DormantDatabase: "cache""#]
        );
    }

    #[tokio::test]
    async fn test_pause_before_ready() {
        let env = TestEnv::new();
        env.seed(&RedisBuilder::new("cache", "default").build());
        env.reconcile("default", "cache").await;

        env.delete_redis("default", "cache").await;
        env.reconcile("default", "cache").await;

        assert!(env.redis("default", "cache").is_none());
        assert_eq!(dormant_phase(&env, "cache"), Some(DatabasePhase::Dormant));
    }

    #[tokio::test]
    async fn test_pause_removes_stats_service() {
        let env = TestEnv::new();
        let redis = RedisBuilder::new("cache", "default").with_monitoring(Some(9121)).build();
        env.seed(&redis);
        env.reconcile("default", "cache").await;
        assert!(env.services.peek("default", "cache-stats").is_some());

        env.delete_redis("default", "cache").await;
        env.reconcile("default", "cache").await;

        assert!(env.services.peek("default", "cache-stats").is_none());
        assert!(env.services.peek("default", "cache").is_some());
    }
}

mod match_tests {
    use super::*;

    #[tokio::test]
    async fn test_same_spec_resumes() {
        let env = TestEnv::new();
        let redis = RedisBuilder::new("cache", "default").build();
        run_then_delete(&env, &redis).await;

        env.seed(&redis);
        env.reconcile("default", "cache").await;

        assert!(env.dormant("default", "cache").is_none());
        let status = env.redis("default", "cache").unwrap().status.unwrap();
        assert_eq!(status.phase, Some(DatabasePhase::Creating));
    }

    #[tokio::test]
    async fn test_changed_spec_is_fatal() {
        let env = TestEnv::new();
        run_then_delete(&env, &RedisBuilder::new("cache", "default").build()).await;

        env.seed(&RedisBuilder::new("cache", "default").with_version("7.4.0").build());
        let requeue = env.reconcile("default", "cache").await;

        assert_eq!(requeue, Some(Duration::from_secs(300)));
        assert!(env.dormant("default", "cache").is_some());
        assert_eq!(
            env.messages(reasons::FAILED_TO_CREATE),
            vec!["Redis spec mismatches with OriginSpec in DormantDatabases"]
        );
        let status = env.redis("default", "cache").unwrap().status.unwrap();
        assert_eq!(status.phase, Some(DatabasePhase::Failed));
        assert_eq!(
            status.reason.as_deref(),
            Some("Redis spec mismatches with OriginSpec in DormantDatabases")
        );
        // Nothing is provisioned over a mismatching snapshot
        assert!(env.statefulsets.is_empty());
    }

    #[tokio::test]
    async fn test_other_kind_is_fatal() {
        let env = TestEnv::new();
        env.dormants
            .insert(&dormant_record("cache", "default", DatabaseKind::Memcached, None))
            .unwrap();

        env.seed(&RedisBuilder::new("cache", "default").build());
        let requeue = env.reconcile("default", "cache").await;

        assert_eq!(requeue, Some(Duration::from_secs(300)));
        assert_eq!(
            env.messages(reasons::FAILED_TO_CREATE),
            vec![r#"Invalid Redis: "cache". Exists DormantDatabase "cache" of different Kind"#]
        );
        assert!(env.dormant("default", "cache").is_some());
    }

    #[tokio::test]
    async fn test_fixing_spec_recovers() {
        let env = TestEnv::new();
        let original = RedisBuilder::new("cache", "default").build();
        run_then_delete(&env, &original).await;

        env.seed(&RedisBuilder::new("cache", "default").with_version("7.4.0").build());
        env.reconcile("default", "cache").await;

        let redis = env.redis("default", "cache").unwrap();
        let mut fixed = redis.clone();
        fixed.spec = original.spec.clone();
        env.ctx.stores.databases.patch_object(&redis, &fixed).await.unwrap();
        env.reconcile("default", "cache").await;

        assert!(env.dormant("default", "cache").is_none());
        let status = env.redis("default", "cache").unwrap().status.unwrap();
        assert_eq!(status.phase, Some(DatabasePhase::Creating));
        assert_eq!(sorted_names(&env.statefulsets, "default"), vec!["cache"]);
    }
}

mod dormant_reconciler_tests {
    use super::*;

    fn claim() -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data-cache-0".to_string()),
                namespace: Some("default".to_string()),
                labels: Some(selector_labels("cache")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fresh_record_becomes_dormant() {
        let env = TestEnv::new();
        let spec = RedisBuilder::new("cache", "default").build().spec;
        env.dormants
            .insert(&dormant_record("cache", "default", DatabaseKind::Redis, Some(spec)))
            .unwrap();

        assert_eq!(env.reconcile_dormant("default", "cache").await, None);
        assert_eq!(dormant_phase(&env, "cache"), Some(DatabasePhase::Dormant));
    }

    #[tokio::test]
    async fn test_other_kind_is_skipped() {
        let env = TestEnv::new();
        env.dormants
            .insert(&dormant_record("cache", "default", DatabaseKind::Postgres, None))
            .unwrap();

        env.reconcile_dormant("default", "cache").await;
        assert_eq!(dormant_phase(&env, "cache"), None);
    }

    #[tokio::test]
    async fn test_resume_recreates_redis() {
        let env = TestEnv::new();
        let redis = RedisBuilder::new("cache", "default").with_label("team", "core").build();
        run_then_delete(&env, &redis).await;

        env.set_dormant_triggers("default", "cache", true, false).await;
        env.reconcile_dormant("default", "cache").await;

        assert_eq!(dormant_phase(&env, "cache"), Some(DatabasePhase::Resuming));
        let recreated = env.redis("default", "cache").unwrap();
        assert_eq!(recreated.spec, redis.spec);
        assert_eq!(
            recreated.metadata.labels.as_ref().and_then(|l| l.get("team")),
            Some(&"core".to_string())
        );
        assert_eq!(
            env.messages(reasons::SUCCESSFUL_CREATE).last().map(String::as_str),
            Some(r#"Successfully created Redis: "cache""#)
        );

        // The recreated object consumes its snapshot on first reconcile
        env.reconcile("default", "cache").await;
        assert!(env.dormant("default", "cache").is_none());
    }

    #[tokio::test]
    async fn test_resume_without_snapshot_fails() {
        let env = TestEnv::new();
        let mut record = dormant_record("cache", "default", DatabaseKind::Redis, None);
        record.spec.resume = true;
        env.dormants.insert(&record).unwrap();

        let requeue = env.reconcile_dormant("default", "cache").await;

        assert_eq!(requeue, Some(Duration::from_secs(300)));
        assert_eq!(dormant_phase(&env, "cache"), Some(DatabasePhase::Failed));
        assert!(env.redis("default", "cache").is_none());
    }

    #[tokio::test]
    async fn test_wipe_out_deletes_dependents() {
        let env = TestEnv::new();
        run_then_delete(&env, &RedisBuilder::new("cache", "default").with_storage("1Gi").build()).await;
        env.pvcs.insert(&claim()).unwrap();

        env.set_dormant_triggers("default", "cache", false, true).await;
        env.reconcile_dormant("default", "cache").await;

        assert!(env.statefulsets.is_empty());
        assert!(env.pvcs.is_empty());
        assert_eq!(sorted_names(&env.services, "default"), vec!["kubedb"]);

        let status = env.dormant("default", "cache").unwrap().status.unwrap();
        assert_eq!(status.phase, Some(DatabasePhase::WipeOut));
        assert!(status.wipe_out_time.is_some());
        assert_eq!(env.messages(reasons::SUCCESSFUL_WIPE_OUT).len(), 1);

        // Already wiped: a second pass does nothing
        env.reconcile_dormant("default", "cache").await;
        assert_eq!(env.messages(reasons::SUCCESSFUL_WIPE_OUT).len(), 1);
    }

    #[tokio::test]
    async fn test_wipe_out_wins_over_resume() {
        let env = TestEnv::new();
        run_then_delete(&env, &RedisBuilder::new("cache", "default").build()).await;

        env.set_dormant_triggers("default", "cache", true, true).await;
        env.reconcile_dormant("default", "cache").await;

        assert_eq!(dormant_phase(&env, "cache"), Some(DatabasePhase::WipeOut));
        assert!(env.redis("default", "cache").is_none());
    }
}
