use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::DatabasePhase;

/// Port the stats exporter listens on when monitoring does not pin one.
pub const DEFAULT_EXPORTER_PORT: i32 = 56790;

/// Redis is the Schema for the redises API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "kubedb.example.com",
    version = "v1alpha1",
    kind = "Redis",
    plural = "redises",
    shortname = "rd",
    namespaced,
    status = "RedisStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Mode", "type":"string", "jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    /// Redis version, used as the image tag (e.g., "7.2.4")
    pub version: String,

    /// Standalone server or sharded cluster
    #[serde(default)]
    pub mode: RedisMode,

    /// Pod count in standalone mode (must be 1 when set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Shard layout in cluster mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterSpec>,

    /// Persistent storage for the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// Stats exporter and scraping configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSpec>,

    /// Mutual TLS between the operator, clients and cluster members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,

    /// What happens to dependents when the Redis object is deleted
    #[serde(default)]
    pub termination_policy: TerminationPolicy,
}

/// Deployment mode
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum RedisMode {
    #[default]
    Standalone,
    Cluster,
}

/// Requested cluster topology
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Number of master shards; the hash-slot space is split across them
    pub master: i32,
    /// Replicas attached to each master
    #[serde(default)]
    pub replicas: i32,
}

/// Storage configuration for Redis data volumes
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name (uses default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Size of the persistent volume (e.g., "1Gi")
    pub size: String,
}

/// Monitoring configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSpec {
    /// Agent that scrapes the exporter
    #[serde(default)]
    pub agent: MonitorAgent,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusSpec>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum MonitorAgent {
    #[default]
    #[serde(rename = "prometheus.io/builtin")]
    PrometheusBuiltin,
    #[serde(rename = "prometheus.io/operator")]
    PrometheusOperator,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    /// Exporter port; 0 or unset is replaced with the default on first reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// TLS configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Issuer that signs the server and client certificates
    pub issuer_ref: IssuerRef,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    pub name: String,
    #[serde(default = "default_issuer_kind")]
    pub kind: String,
}

fn default_issuer_kind() -> String {
    "Issuer".to_string()
}

/// Deletion behavior
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum TerminationPolicy {
    /// Keep data and leave a DormantDatabase behind
    #[default]
    Pause,
    /// Delete workloads, keep PVCs
    Delete,
    /// Delete everything, including PVCs, secrets and any dormant record
    WipeOut,
    /// Refuse to release the object
    DoNotTerminate,
}

/// Status of a Redis object
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatus {
    /// Current lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DatabasePhase>,

    /// RFC 3339 time of the first successful reconcile; written once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,

    /// Generation last acted upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable reason for the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Redis {
    pub fn is_cluster(&self) -> bool {
        self.spec.mode == RedisMode::Cluster
    }

    /// Number of master shards (1 in standalone mode)
    pub fn masters(&self) -> i32 {
        match (&self.spec.mode, &self.spec.cluster) {
            (RedisMode::Cluster, Some(cluster)) => cluster.master,
            _ => 1,
        }
    }

    /// Replicas attached to each master (0 in standalone mode)
    pub fn replicas_per_master(&self) -> i32 {
        match (&self.spec.mode, &self.spec.cluster) {
            (RedisMode::Cluster, Some(cluster)) => cluster.replicas,
            _ => 0,
        }
    }

    /// Total pods across all workloads
    pub fn total_pods(&self) -> i32 {
        if self.is_cluster() {
            self.masters() * (self.replicas_per_master() + 1)
        } else {
            self.spec.replicas.unwrap_or(1)
        }
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.spec.monitor.is_some()
    }

    /// Exporter port, if monitoring is on and the port has been set
    pub fn exporter_port(&self) -> Option<i32> {
        self.spec
            .monitor
            .as_ref()
            .and_then(|m| m.prometheus.as_ref())
            .and_then(|p| p.port)
            .filter(|port| *port != 0)
    }

    pub fn tls_enabled(&self) -> bool {
        self.spec.tls.is_some()
    }
}
