//! Common utilities for Kubernetes resource generation
//!
//! Generators in this module family are transforms: they take the stored
//! object (or a default carrying only its identity) and return it with the
//! operator-owned fields set. Applying one twice yields the same object, so
//! the store can diff the result and skip empty patches.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{DatabaseKind, LABEL_DATABASE_KIND, LABEL_DATABASE_NAME, Redis};

/// API version for the Redis CRD
pub const API_VERSION: &str = "kubedb.example.com/v1alpha1";

/// Kind for the Redis CRD
pub const KIND: &str = "Redis";

/// Operator field manager name
pub const FIELD_MANAGER: &str = "redis-operator";

/// Client port
pub const REDIS_PORT: i32 = 6379;

/// Cluster bus port (client port + 10000)
pub const CLUSTER_BUS_PORT: i32 = 16379;

/// Shard index label on cluster-mode workloads and pods
pub const SHARD_LABEL: &str = "kubedb.example.com/shard";

/// Annotation declaring the slot range a shard is expected to serve
pub const SLOT_RANGE_ANNOTATION: &str = "kubedb.example.com/slot-range";

/// Generate an owner reference for a Redis object
///
/// Dependents carrying it are garbage collected with the Redis object.
pub fn owner_reference(redis: &Redis) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: redis.name_any(),
        uid: redis.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Generate standard labels for all resources belonging to a Redis object
///
/// The kind/name pair is what wipe-out selects dependents by.
pub fn standard_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "redis".to_string()),
        ("app.kubernetes.io/instance".to_string(), name.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (
            LABEL_DATABASE_KIND.to_string(),
            DatabaseKind::Redis.to_string(),
        ),
        (LABEL_DATABASE_NAME.to_string(), name.to_string()),
    ])
}

/// Selector matching every pod of a Redis object
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            LABEL_DATABASE_KIND.to_string(),
            DatabaseKind::Redis.to_string(),
        ),
        (LABEL_DATABASE_NAME.to_string(), name.to_string()),
    ])
}

/// Container image for a version
pub fn image(registry: &str, version: &str) -> String {
    format!("{}/redis:{}", registry.trim_end_matches('/'), version)
}

/// Set operator labels and the owner reference on `meta`, keeping anything
/// else already present.
pub fn claim_metadata(
    meta: &mut ObjectMeta,
    labels: &BTreeMap<String, String>,
    owner: OwnerReference,
) {
    let existing = meta.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in labels {
        existing.insert(key.clone(), value.clone());
    }

    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    match refs.iter_mut().find(|r| r.uid == owner.uid && r.kind == owner.kind) {
        Some(current) => *current = owner,
        None => refs.push(owner),
    }
}
