//! Types shared by every database kind and its dormant twin.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// API group served by the operator.
pub const API_GROUP: &str = "kubedb.example.com";

/// Label carrying the database kind on dormant records and dependents.
pub const LABEL_DATABASE_KIND: &str = "kubedb.example.com/kind";

/// Label carrying the database name on dormant records and dependents.
pub const LABEL_DATABASE_NAME: &str = "kubedb.example.com/name";

/// Lifecycle phase of a database and of its dormant record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum DatabasePhase {
    /// Dependents are being provisioned
    #[default]
    Creating,
    /// All workloads report ready
    Running,
    /// Deletion with the Pause policy is snapshotting the database
    Pausing,
    /// Only the dormant record remains
    Dormant,
    /// The dormant record asked for the database to be recreated
    Resuming,
    /// Dependents and data are being deleted
    WipeOut,
    /// A reconcile pass failed; see `status.reason`
    Failed,
}

impl fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabasePhase::Creating => write!(f, "Creating"),
            DatabasePhase::Running => write!(f, "Running"),
            DatabasePhase::Pausing => write!(f, "Pausing"),
            DatabasePhase::Dormant => write!(f, "Dormant"),
            DatabasePhase::Resuming => write!(f, "Resuming"),
            DatabasePhase::WipeOut => write!(f, "WipeOut"),
            DatabasePhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Database kinds that may leave a dormant record behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatabaseKind {
    Redis,
    Memcached,
    MongoDB,
    MySQL,
    Postgres,
    Elasticsearch,
    Etcd,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Redis => "Redis",
            DatabaseKind::Memcached => "Memcached",
            DatabaseKind::MongoDB => "MongoDB",
            DatabaseKind::MySQL => "MySQL",
            DatabaseKind::Postgres => "Postgres",
            DatabaseKind::Elasticsearch => "Elasticsearch",
            DatabaseKind::Etcd => "Etcd",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind label value that does not name a known database kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown database kind {0:?}")]
pub struct UnknownKind(pub String);

impl FromStr for DatabaseKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Redis" => Ok(DatabaseKind::Redis),
            "Memcached" => Ok(DatabaseKind::Memcached),
            "MongoDB" => Ok(DatabaseKind::MongoDB),
            "MySQL" => Ok(DatabaseKind::MySQL),
            "Postgres" => Ok(DatabaseKind::Postgres),
            "Elasticsearch" => Ok(DatabaseKind::Elasticsearch),
            "Etcd" => Ok(DatabaseKind::Etcd),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}
