//! Pause, resume and wipe-out of databases through DormantDatabase records
//!
//! Pausing leaves a DormantDatabase with the same name holding a snapshot of
//! the database. A database created later under that name may only take over
//! the data if the snapshot is of the same kind and its spec is structurally
//! equal to the new one.

use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};
use tracing::{info, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::state_machine::{LifecycleEvent, TransitionContext};
use crate::controller::status::{now, transition_phase};
use crate::crd::{
    DatabaseKind, DatabasePhase, DormantDatabase, LABEL_DATABASE_KIND, LABEL_DATABASE_NAME, Origin,
    OriginMeta, OriginSpec, Redis,
};
use crate::events::{EventType, reasons};
use crate::redis::{client_cert_secret_name, server_cert_secret_name};
use crate::resources::selector_labels;
use crate::resources::service::stats_service_name;
use crate::store::patch::structurally_equal;

/// Outcome of looking for a dormant twin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DormantMatch {
    /// No dormant record; provision from scratch
    Absent,
    /// A matching dormant record was found and deleted
    Resumed,
}

/// Labels identifying the dormant record of a Redis object
pub fn dormant_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_DATABASE_KIND.to_string(), DatabaseKind::Redis.to_string()),
        (LABEL_DATABASE_NAME.to_string(), name.to_string()),
    ])
}

/// Check a dormant record with the database's name against the database.
///
/// A record of another kind, or one whose snapshot differs from the live
/// spec, is a `FatalMismatch`. A matching record is deleted.
pub async fn match_dormant(ctx: &Context, redis: &Redis) -> Result<DormantMatch> {
    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();
    let object = redis.object_ref(&());

    let dormant = match ctx.stores.dormants.get(&ns, &name).await {
        Ok(Some(dormant)) => dormant,
        Ok(None) => return Ok(DormantMatch::Absent),
        Err(e) => {
            ctx.recorder
                .record(
                    &object,
                    EventType::Warning,
                    reasons::FAILED_TO_GET,
                    format!(r#"Fail to get DormantDatabase: "{}". Reason: {}"#, name, e),
                )
                .await;
            return Err(e.into());
        }
    };

    let kind = dormant
        .labels()
        .get(LABEL_DATABASE_KIND)
        .and_then(|kind| kind.parse::<DatabaseKind>().ok());
    if kind != Some(DatabaseKind::Redis) {
        let message = format!(
            r#"Invalid Redis: "{}". Exists DormantDatabase "{}" of different Kind"#,
            name,
            dormant.name_any()
        );
        return Err(mismatch(ctx, redis, message).await);
    }

    if !structurally_equal(&dormant.spec.origin.spec.redis, &Some(&redis.spec))? {
        let message = "Redis spec mismatches with OriginSpec in DormantDatabases".to_string();
        return Err(mismatch(ctx, redis, message).await);
    }

    ctx.stores.dormants.delete_if_exists(&ns, &name).await?;
    info!(namespace = %ns, %name, "Resumed from DormantDatabase");
    Ok(DormantMatch::Resumed)
}

async fn mismatch(ctx: &Context, redis: &Redis, message: String) -> Error {
    ctx.recorder
        .record(
            &redis.object_ref(&()),
            EventType::Warning,
            reasons::FAILED_TO_CREATE,
            message.clone(),
        )
        .await;
    Error::FatalMismatch(message)
}

/// Snapshot of `redis` for its dormant record
fn dormant_snapshot(redis: &Redis, mut dormant: DormantDatabase) -> DormantDatabase {
    let name = redis.name_any();
    let labels = dormant.metadata.labels.get_or_insert_with(BTreeMap::new);
    labels.extend(dormant_labels(&name));

    dormant.spec.origin = Origin {
        metadata: OriginMeta {
            name,
            namespace: redis.namespace().unwrap_or_default(),
            labels: redis.labels().clone(),
            annotations: redis.annotations().clone(),
        },
        spec: OriginSpec {
            redis: Some(redis.spec.clone()),
        },
    };
    dormant.spec.resume = false;
    dormant.spec.wipe_out = false;
    dormant
}

/// Pause `redis`: store its dormant snapshot and mark it `Dormant`.
///
/// Failing to store the snapshot is an error; failing to remove the
/// monitoring service is only recorded.
pub async fn pause(ctx: &Context, redis: &Redis) -> Result<()> {
    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();
    let object = redis.object_ref(&());
    let none = TransitionContext::default();
    let databases = &ctx.stores.databases;

    transition_phase(
        databases,
        &ctx.state_machine,
        redis,
        LifecycleEvent::PauseRequested,
        &none,
        None,
    )
    .await?;

    let stored = ctx
        .stores
        .dormants
        .create_or_patch(&ns, &name, |dormant| dormant_snapshot(redis, dormant))
        .await;
    let (dormant, verb) = match stored {
        Ok(stored) => stored,
        Err(e) => {
            ctx.recorder
                .record(
                    &object,
                    EventType::Warning,
                    reasons::FAILED_TO_CREATE,
                    format!(r#"Failed to create DormantDatabase: "{}". Reason: {}"#, name, e),
                )
                .await;
            return Err(e.into());
        }
    };

    let pausing_time = now();
    let dormant = ctx
        .stores
        .dormants
        .update_status(&ns, &name, |mut status| {
            status.phase = Some(DatabasePhase::Pausing);
            status.pausing_time = Some(pausing_time.clone());
            status.reason = None;
            status
        })
        .await?;
    transition_phase(
        &ctx.stores.dormants,
        &ctx.state_machine,
        &dormant,
        LifecycleEvent::SnapshotStored,
        &none,
        None,
    )
    .await?;

    ctx.recorder
        .record(
            &object,
            EventType::Normal,
            reasons::SUCCESSFUL_CREATE,
            format!(r#"Successfully created DormantDatabase: "{}""#, name),
        )
        .await;
    info!(namespace = %ns, %name, %verb, "Stored DormantDatabase");

    if let Some(current) = databases.get(&ns, &name).await? {
        transition_phase(
            databases,
            &ctx.state_machine,
            &current,
            LifecycleEvent::SnapshotStored,
            &none,
            None,
        )
        .await?;
    }

    if redis.monitoring_enabled()
        && let Err(e) = ctx.stores.services.delete_if_exists(&ns, &stats_service_name(&name)).await
    {
        ctx.recorder
            .record(
                &object,
                EventType::Warning,
                reasons::FAILED_TO_DELETE,
                format!("Failed to delete monitoring system. Reason: {}", e),
            )
            .await;
        warn!(namespace = %ns, %name, error = %e, "Failed to delete monitoring system");
    }

    Ok(())
}

/// Delete every dependent of the Redis object `name`, PVCs and TLS secrets
/// included. Returns how many objects were deleted.
pub async fn wipe_out_dependents(ctx: &Context, ns: &str, name: &str) -> Result<usize> {
    let selector = selector_labels(name);
    let mut deleted = 0;

    for sts in ctx.stores.statefulsets.list(ns, &selector).await? {
        let removed = ctx.stores.statefulsets.delete_if_exists(ns, &sts.name_any()).await?;
        deleted += usize::from(removed);
    }
    for svc in ctx.stores.services.list(ns, &selector).await? {
        deleted += usize::from(ctx.stores.services.delete_if_exists(ns, &svc.name_any()).await?);
    }
    for pvc in ctx.stores.pvcs.list(ns, &selector).await? {
        deleted += usize::from(ctx.stores.pvcs.delete_if_exists(ns, &pvc.name_any()).await?);
    }

    let mut secrets: Vec<String> = ctx
        .stores
        .secrets
        .list(ns, &selector)
        .await?
        .iter()
        .map(|s| s.name_any())
        .collect();
    secrets.extend([server_cert_secret_name(name), client_cert_secret_name(name)]);
    secrets.sort();
    secrets.dedup();
    for secret in secrets {
        deleted += usize::from(ctx.stores.secrets.delete_if_exists(ns, &secret).await?);
    }

    info!(namespace = %ns, %name, deleted, "Wiped out dependents");
    Ok(deleted)
}
