//! StatefulSet generation for Redis objects
//!
//! Standalone mode runs a single StatefulSet named after the object. Cluster
//! mode runs one StatefulSet per master shard, `{name}-shard{i}`, each with
//! the master plus its replicas, annotated with the slot range the shard is
//! expected to serve.
//!
//! Selector, service name and volume claim templates are immutable once a
//! StatefulSet exists, so they are only written when the object is created.
//! Containers and volumes are upserted by name so fields filled in by the API
//! server survive a patch.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, Probe, SecretVolumeSource, TCPSocketAction, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Redis;
use crate::redis::server_cert_secret_name;
use crate::resources::common::{
    CLUSTER_BUS_PORT, REDIS_PORT, SHARD_LABEL, SLOT_RANGE_ANNOTATION, claim_metadata, image,
    owner_reference, selector_labels, standard_labels,
};
use crate::topology::{SlotRange, TopologyError, expected_partition};

/// Stats exporter sidecar image
pub const EXPORTER_IMAGE: &str = "oliver006/redis_exporter:v1.62.0";

const REDIS_CONTAINER: &str = "redis";
const EXPORTER_CONTAINER: &str = "exporter";
const DATA_VOLUME: &str = "data";
const CERTS_VOLUME: &str = "certs";

/// One StatefulSet the database needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadLayout {
    pub name: String,
    pub replicas: i32,
    /// Shard index in cluster mode
    pub shard: Option<u32>,
    /// Slot range the shard's master should own
    pub slots: Option<SlotRange>,
}

/// Name of the StatefulSet for shard `index`
pub fn shard_name(redis_name: &str, index: u32) -> String {
    format!("{}-shard{}", redis_name, index)
}

/// Workloads for a Redis object, in shard order
pub fn workload_layouts(redis: &Redis) -> Result<Vec<WorkloadLayout>, TopologyError> {
    let name = redis.name_any();

    if !redis.is_cluster() {
        return Ok(vec![WorkloadLayout {
            name,
            replicas: redis.spec.replicas.unwrap_or(1),
            shard: None,
            slots: None,
        }]);
    }

    let masters = u32::try_from(redis.masters()).map_err(|_| TopologyError::InvalidMasterCount(0))?;
    let ranges = expected_partition(masters)?;

    Ok(ranges
        .into_iter()
        .zip(0u32..)
        .map(|(range, index)| WorkloadLayout {
            name: shard_name(&name, index),
            replicas: redis.replicas_per_master() + 1,
            shard: Some(index),
            slots: Some(range),
        })
        .collect())
}

/// Settings shared by every workload the operator renders
#[derive(Debug, Clone)]
pub struct WorkloadSettings {
    pub image_registry: String,
    pub governing_service: String,
}

fn pod_labels(redis_name: &str, layout: &WorkloadLayout) -> BTreeMap<String, String> {
    let mut labels = standard_labels(redis_name);
    if let Some(shard) = layout.shard {
        labels.insert(SHARD_LABEL.to_string(), shard.to_string());
    }
    labels
}

fn match_labels(redis_name: &str, layout: &WorkloadLayout) -> BTreeMap<String, String> {
    let mut labels = selector_labels(redis_name);
    if let Some(shard) = layout.shard {
        labels.insert(SHARD_LABEL.to_string(), shard.to_string());
    }
    labels
}

fn redis_args(redis: &Redis) -> Vec<String> {
    let mut args = vec!["redis-server".to_string()];

    if redis.tls_enabled() {
        args.extend([
            "--port".to_string(),
            "0".to_string(),
            "--tls-port".to_string(),
            REDIS_PORT.to_string(),
            "--tls-cert-file".to_string(),
            "/certs/tls.crt".to_string(),
            "--tls-key-file".to_string(),
            "/certs/tls.key".to_string(),
            "--tls-ca-cert-file".to_string(),
            "/certs/ca.crt".to_string(),
            "--tls-replication".to_string(),
            "yes".to_string(),
        ]);
        if redis.is_cluster() {
            args.extend(["--tls-cluster".to_string(), "yes".to_string()]);
        }
    } else {
        args.extend(["--port".to_string(), REDIS_PORT.to_string()]);
    }

    if redis.is_cluster() {
        args.extend([
            "--cluster-enabled".to_string(),
            "yes".to_string(),
            "--cluster-config-file".to_string(),
            "/data/nodes.conf".to_string(),
        ]);
    }

    args.extend(["--dir".to_string(), "/data".to_string()]);
    args
}

fn tcp_probe(initial_delay: i32, failure_threshold: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(REDIS_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        success_threshold: Some(1),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Find the container named `name`, appending an empty one if absent.
fn upsert_container<'a>(containers: &'a mut Vec<Container>, name: &str) -> &'a mut Container {
    let index = match containers.iter().position(|c| c.name == name) {
        Some(index) => index,
        None => {
            containers.push(Container {
                name: name.to_string(),
                ..Default::default()
            });
            containers.len() - 1
        }
    };
    &mut containers[index]
}

fn upsert_volume(volumes: &mut Vec<Volume>, volume: Volume) {
    match volumes.iter_mut().find(|v| v.name == volume.name) {
        Some(current) => *current = volume,
        None => volumes.push(volume),
    }
}

fn data_claim_template(redis: &Redis) -> Option<PersistentVolumeClaim> {
    let storage = redis.spec.storage.as_ref()?;
    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            // Claims keep these labels so wipe-out can find them
            labels: Some(selector_labels(&redis.name_any())),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn render_pod_spec(redis: &Redis, settings: &WorkloadSettings, pod: &mut PodSpec) {
    let name = redis.name_any();

    let server = upsert_container(&mut pod.containers, REDIS_CONTAINER);
    server.image = Some(image(&settings.image_registry, &redis.spec.version));
    server.args = Some(redis_args(redis));
    let mut ports = vec![container_port("db", REDIS_PORT)];
    if redis.is_cluster() {
        ports.push(container_port("gossip", CLUSTER_BUS_PORT));
    }
    server.ports = Some(ports);
    server.readiness_probe = Some(tcp_probe(5, 3));
    server.liveness_probe = Some(tcp_probe(30, 6));

    let mut mounts = vec![VolumeMount {
        name: DATA_VOLUME.to_string(),
        mount_path: "/data".to_string(),
        ..Default::default()
    }];
    if redis.tls_enabled() {
        mounts.push(VolumeMount {
            name: CERTS_VOLUME.to_string(),
            mount_path: "/certs".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    server.volume_mounts = Some(mounts);

    match redis.exporter_port() {
        Some(port) if redis.monitoring_enabled() => {
            let exporter = upsert_container(&mut pod.containers, EXPORTER_CONTAINER);
            exporter.image = Some(EXPORTER_IMAGE.to_string());
            exporter.args = Some(vec![format!("--web.listen-address=:{}", port)]);
            exporter.ports = Some(vec![container_port("prom-http", port)]);
        }
        _ => pod.containers.retain(|c| c.name != EXPORTER_CONTAINER),
    }

    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    if redis.spec.storage.is_none() {
        upsert_volume(
            volumes,
            Volume {
                name: DATA_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
        );
    }
    if redis.tls_enabled() {
        upsert_volume(
            volumes,
            Volume {
                name: CERTS_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(server_cert_secret_name(&name)),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
    } else {
        volumes.retain(|v| v.name != CERTS_VOLUME);
    }
    if volumes.is_empty() {
        pod.volumes = None;
    }
}

/// Render `layout` onto `sts`
pub fn statefulset(
    redis: &Redis,
    layout: &WorkloadLayout,
    settings: &WorkloadSettings,
    mut sts: StatefulSet,
) -> StatefulSet {
    let name = redis.name_any();
    let labels = pod_labels(&name, layout);

    claim_metadata(&mut sts.metadata, &labels, owner_reference(redis));
    if let Some(range) = layout.slots {
        sts.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(SLOT_RANGE_ANNOTATION.to_string(), range.to_string());
    }

    let spec = sts.spec.get_or_insert_with(|| StatefulSetSpec {
        service_name: Some(settings.governing_service.clone()),
        selector: LabelSelector {
            match_labels: Some(match_labels(&name, layout)),
            ..Default::default()
        },
        pod_management_policy: Some("Parallel".to_string()),
        volume_claim_templates: data_claim_template(redis).map(|pvc| vec![pvc]),
        ..Default::default()
    });
    spec.replicas = Some(layout.replicas);

    let template = &mut spec.template;
    let template_meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    let template_labels = template_meta.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in &labels {
        template_labels.insert(key.clone(), value.clone());
    }

    render_pod_spec(redis, settings, template.spec.get_or_insert_with(PodSpec::default));
    sts
}

/// Ready pods reported by a StatefulSet
pub fn ready_replicas(sts: &StatefulSet) -> i32 {
    sts.status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}
