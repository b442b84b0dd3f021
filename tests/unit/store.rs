//! Unit tests for the record store protocols

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use kube::ResourceExt;

use redis_operator::crd::{DatabasePhase, Redis, RedisSpec, RedisStatus};
use redis_operator::store::{MemoryRecords, ResourceStore, RetryConfig, StoreError, Verb};

use crate::common::RedisBuilder;

fn retry() -> RetryConfig {
    RetryConfig {
        interval: Duration::from_millis(1),
        max_attempts: 5,
    }
}

fn store<K: redis_operator::store::Record>() -> (Arc<MemoryRecords<K>>, ResourceStore<K>) {
    let records = Arc::new(MemoryRecords::<K>::new());
    let store = ResourceStore::new(records.clone(), retry());
    (records, store)
}

fn with_port(port: i32) -> impl Fn(Service) -> Service + Send + Sync {
    move |mut svc: Service| {
        svc.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("app".to_string(), "cache".to_string());
        let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
        spec.cluster_ip = Some("None".to_string());
        spec.ports = Some(vec![k8s_openapi::api::core::v1::ServicePort {
            port,
            ..Default::default()
        }]);
        svc
    }
}

mod create_or_patch_tests {
    use super::*;

    #[tokio::test]
    async fn test_second_call_is_unchanged() {
        let (records, store) = store::<Service>();

        let (created, verb) = store.create_or_patch("default", "cache", with_port(6379)).await.unwrap();
        assert_eq!(verb, Verb::Created);
        let version = created.resource_version();

        let (same, verb) = store.create_or_patch("default", "cache", with_port(6379)).await.unwrap();
        assert_eq!(verb, Verb::Unchanged);
        assert_eq!(same.resource_version(), version);
        assert_eq!(records.writes(), 1);
    }

    #[tokio::test]
    async fn test_changed_transform_patches() {
        let (_, store) = store::<Service>();
        store.create_or_patch("default", "cache", with_port(6379)).await.unwrap();

        let (patched, verb) = store.create_or_patch("default", "cache", with_port(6380)).await.unwrap();
        assert_eq!(verb, Verb::Patched);
        let ports = patched.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 6380);
    }

    #[tokio::test]
    async fn test_created_record_carries_identity() {
        let (_, store) = store::<Service>();
        let (created, _) = store.create_or_patch("team-a", "cache", with_port(6379)).await.unwrap();
        assert_eq!(created.name_any(), "cache");
        assert_eq!(created.namespace().as_deref(), Some("team-a"));
        assert!(created.metadata.uid.is_some());
    }

    #[tokio::test]
    async fn test_server_filled_fields_survive_patch() {
        let (records, store) = store::<Service>();
        let mut svc = with_port(6379)(Service::default());
        svc.metadata.name = Some("cache".to_string());
        svc.metadata.namespace = Some("default".to_string());
        svc.spec.as_mut().unwrap().session_affinity = Some("None".to_string());
        records.insert(&svc).unwrap();

        let (patched, verb) = store.create_or_patch("default", "cache", with_port(6379)).await.unwrap();
        assert_eq!(verb, Verb::Unchanged);
        assert_eq!(patched.spec.unwrap().session_affinity.as_deref(), Some("None"));
    }
}

mod try_update_tests {
    use super::*;

    fn bump_version(mut redis: Redis) -> Redis {
        redis.spec.version = "7.4.0".to_string();
        redis
    }

    #[tokio::test]
    async fn test_converges_with_fewer_conflicts_than_attempts() {
        let (records, store) = store::<Redis>();
        records.insert(&RedisBuilder::new("cache", "default").build()).unwrap();

        records.interfere(4);
        let updated = store.try_update("default", "cache", bump_version).await.unwrap();
        assert_eq!(updated.spec.version, "7.4.0");
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let (records, store) = store::<Redis>();
        records.insert(&RedisBuilder::new("cache", "default").build()).unwrap();

        records.interfere(5);
        let err = store.try_update("default", "cache", bump_version).await.unwrap_err();
        match err {
            StoreError::AttemptsExhausted {
                kind,
                namespace,
                name,
                attempts,
                ..
            } => {
                assert_eq!(kind, "Redis");
                assert_eq!(namespace, "default");
                assert_eq!(name, "cache");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(records.peek("default", "cache").unwrap().spec.version, "7.2.4");
    }

    #[tokio::test]
    async fn test_missing_record_aborts() {
        let (_, store) = store::<Redis>();
        let err = store.try_update("default", "ghost", bump_version).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_bumps_generation() {
        let (records, store) = store::<Redis>();
        records.insert(&RedisBuilder::new("cache", "default").build()).unwrap();

        let updated = store.try_update("default", "cache", bump_version).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(2));
    }
}

mod update_status_tests {
    use super::*;

    #[tokio::test]
    async fn test_status_only_changes_status() {
        let (records, store) = store::<Redis>();
        records.insert(&RedisBuilder::new("cache", "default").build()).unwrap();

        let updated = store
            .update_status("default", "cache", |mut status| {
                status.phase = Some(DatabasePhase::Running);
                status
            })
            .await
            .unwrap();

        assert_eq!(updated.status.unwrap().phase, Some(DatabasePhase::Running));
        assert_eq!(updated.spec, RedisSpec {
            version: "7.2.4".to_string(),
            ..Default::default()
        });
        assert_eq!(updated.metadata.generation, Some(1));
    }

    #[tokio::test]
    async fn test_status_conflict_is_retried() {
        let (records, store) = store::<Redis>();
        records.insert(&RedisBuilder::new("cache", "default").build()).unwrap();

        records.interfere(2);
        let updated = store
            .update_status("default", "cache", |mut status| {
                status.reason = Some("probe".to_string());
                status
            })
            .await
            .unwrap();
        assert_eq!(updated.status.unwrap().reason.as_deref(), Some("probe"));
    }

    #[tokio::test]
    async fn test_unchanged_status_sends_nothing() {
        let (records, store) = store::<Redis>();
        let mut redis = RedisBuilder::new("cache", "default").build();
        redis.status = Some(RedisStatus {
            phase: Some(DatabasePhase::Creating),
            ..Default::default()
        });
        records.insert(&redis).unwrap();
        let before = records.writes();

        store.update_status("default", "cache", |status| status).await.unwrap();
        assert_eq!(records.writes(), before);
    }
}

mod delete_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_missing_is_success() {
        let (_, store) = store::<Service>();
        assert!(!store.delete_if_exists("default", "ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_existing() {
        let (records, store) = store::<Service>();
        store.create_or_patch("default", "cache", with_port(6379)).await.unwrap();
        assert!(store.delete_if_exists("default", "cache").await.unwrap());
        assert!(records.peek("default", "cache").is_none());
    }

    #[tokio::test]
    async fn test_list_by_labels() {
        let (_, store) = store::<Service>();
        store.create_or_patch("default", "cache", with_port(6379)).await.unwrap();
        store
            .create_or_patch("default", "other", |svc: Service| svc)
            .await
            .unwrap();

        let selector = BTreeMap::from([("app".to_string(), "cache".to_string())]);
        let listed = store.list("default", &selector).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name_any(), "cache");
    }
}
