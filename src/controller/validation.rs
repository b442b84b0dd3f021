//! Validation of Redis specs
//!
//! A spec that fails here is a user error: the reconciler records it as an
//! event and does not retry until the object changes.

use crate::controller::error::{Error, Result};
use crate::crd::{Redis, RedisMode};
use crate::topology::TOTAL_SLOTS;

/// Smallest cluster the bootstrap tooling accepts
pub const MIN_MASTERS: i32 = 3;

/// Each master must own at least one slot
pub const MAX_MASTERS: i32 = TOTAL_SLOTS as i32;

/// Upper bound on replicas per master
pub const MAX_REPLICAS_PER_MASTER: i32 = 5;

/// Validate the Redis spec
pub fn validate_spec(redis: &Redis) -> Result<()> {
    validate_version(redis)?;
    validate_topology(redis)?;
    validate_storage(redis)?;
    validate_monitor(redis)?;
    validate_tls(redis)?;
    Ok(())
}

fn validate_version(redis: &Redis) -> Result<()> {
    let version = redis.spec.version.trim();
    if version.is_empty() {
        return Err(Error::ValidationError("spec.version is required".to_string()));
    }
    if version.contains(|c: char| c.is_whitespace() || c == '/' || c == ':') {
        return Err(Error::ValidationError(format!(
            "spec.version {:?} is not a valid image tag",
            version
        )));
    }
    Ok(())
}

fn validate_topology(redis: &Redis) -> Result<()> {
    match redis.spec.mode {
        RedisMode::Standalone => {
            if let Some(replicas) = redis.spec.replicas
                && replicas != 1
            {
                return Err(Error::ValidationError(format!(
                    "spec.replicas must be 1 in standalone mode, got {}",
                    replicas
                )));
            }
            if redis.spec.cluster.is_some() {
                return Err(Error::ValidationError(
                    "spec.cluster is only allowed in Cluster mode".to_string(),
                ));
            }
        }
        RedisMode::Cluster => {
            let Some(cluster) = redis.spec.cluster.as_ref() else {
                return Err(Error::ValidationError(
                    "spec.cluster is required in Cluster mode".to_string(),
                ));
            };
            if !(MIN_MASTERS..=MAX_MASTERS).contains(&cluster.master) {
                return Err(Error::ValidationError(format!(
                    "spec.cluster.master must be between {} and {}, got {}",
                    MIN_MASTERS, MAX_MASTERS, cluster.master
                )));
            }
            if !(0..=MAX_REPLICAS_PER_MASTER).contains(&cluster.replicas) {
                return Err(Error::ValidationError(format!(
                    "spec.cluster.replicas must be between 0 and {}, got {}",
                    MAX_REPLICAS_PER_MASTER, cluster.replicas
                )));
            }
            if redis.spec.replicas.is_some() {
                return Err(Error::ValidationError(
                    "spec.replicas is not used in Cluster mode; set spec.cluster.replicas".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn validate_storage(redis: &Redis) -> Result<()> {
    let Some(storage) = redis.spec.storage.as_ref() else {
        return Ok(());
    };
    let size = &storage.size;

    if !size.ends_with("Gi") && !size.ends_with("Mi") && !size.ends_with("Ti") {
        return Err(Error::ValidationError(format!(
            "storage size must end with Gi, Mi, or Ti: {}",
            size
        )));
    }

    let num_str = size.trim_end_matches(char::is_alphabetic);
    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::ValidationError(format!("invalid storage size number: {}", size)))?;
    if num == 0 {
        return Err(Error::ValidationError(format!("storage size must be positive: {}", size)));
    }

    Ok(())
}

fn validate_monitor(redis: &Redis) -> Result<()> {
    let port = redis
        .spec
        .monitor
        .as_ref()
        .and_then(|m| m.prometheus.as_ref())
        .and_then(|p| p.port);

    match port {
        // 0 is replaced with the default exporter port
        None | Some(0) => Ok(()),
        Some(port) if (1..=65535).contains(&port) && port != 6379 && port != 16379 => Ok(()),
        Some(port) => Err(Error::ValidationError(format!(
            "spec.monitor.prometheus.port {} is out of range or collides with a Redis port",
            port
        ))),
    }
}

fn validate_tls(redis: &Redis) -> Result<()> {
    if let Some(tls) = redis.spec.tls.as_ref()
        && tls.issuer_ref.name.trim().is_empty()
    {
        return Err(Error::ValidationError(
            "spec.tls.issuerRef.name is required".to_string(),
        ));
    }
    Ok(())
}
