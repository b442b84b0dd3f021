//! Dependent objects of a Redis database
//!
//! Each `ensure_*` step is a create-or-patch through the record store and
//! reports whether it created, patched or left the object alone.

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::crd::{DEFAULT_EXPORTER_PORT, PrometheusSpec, Redis};
use crate::events::{EventType, reasons};
use crate::resources::service::{
    governing_service, primary_service, stats_service, stats_service_name,
};
use crate::resources::statefulset::statefulset;
use crate::resources::{ready_replicas, selector_labels, workload_layouts};
use crate::store::Verb;

/// Fill in the exporter port when monitoring is on and none is pinned.
///
/// Returns the patched object, or the input unchanged.
pub async fn default_monitor_port(ctx: &Context, redis: &Redis) -> Result<Redis> {
    if !redis.monitoring_enabled() || redis.exporter_port().is_some() {
        return Ok(redis.clone());
    }

    let result = ctx
        .stores
        .databases
        .patch(redis, |mut current| {
            if let Some(monitor) = current.spec.monitor.as_mut() {
                monitor
                    .prometheus
                    .get_or_insert_with(PrometheusSpec::default)
                    .port = Some(DEFAULT_EXPORTER_PORT);
            }
            current
        })
        .await;
    let (patched, verb) = match result {
        Ok(done) => done,
        Err(e) => {
            ctx.recorder
                .record(
                    &redis.object_ref(&()),
                    EventType::Warning,
                    reasons::FAILED_TO_UPDATE,
                    e.to_string(),
                )
                .await;
            return Err(e.into());
        }
    };
    debug!(
        name = %redis.name_any(),
        %verb,
        port = DEFAULT_EXPORTER_PORT,
        "Defaulted exporter port"
    );
    Ok(patched)
}

/// Ensure the namespace's governing service exists.
pub async fn ensure_governing_service(ctx: &Context, redis: &Redis) -> Result<Verb> {
    let ns = redis.namespace().unwrap_or_default();
    let governing = &ctx.config.governing_service;

    match ctx.stores.services.create_or_patch(&ns, governing, governing_service).await {
        Ok((_, verb)) => Ok(verb),
        Err(e) => {
            ctx.recorder
                .record(
                    &redis.object_ref(&()),
                    EventType::Warning,
                    reasons::FAILED_TO_CREATE,
                    format!(r#"Failed to create Service: "{}". Reason: {}"#, governing, e),
                )
                .await;
            Err(e.into())
        }
    }
}

/// Ensure the client-facing service `{name}`.
pub async fn ensure_service(ctx: &Context, redis: &Redis) -> Result<Verb> {
    let ns = redis.namespace().unwrap_or_default();
    let (_, verb) = ctx
        .stores
        .services
        .create_or_patch(&ns, &redis.name_any(), |svc| primary_service(redis, svc))
        .await?;
    Ok(verb)
}

/// Ensure every StatefulSet of the database.
///
/// Shard verbs fold into one: `Created` only when every shard was created.
/// StatefulSets of the database that no longer match a layout, left behind
/// by fewer masters or a mode switch, are deleted and count as `Patched`.
pub async fn ensure_statefulsets(
    ctx: &Context,
    redis: &Redis,
) -> Result<(Verb, Vec<StatefulSet>)> {
    let ns = redis.namespace().unwrap_or_default();
    let settings = ctx.workload_settings();
    let layouts = workload_layouts(redis)?;

    let mut verbs = Vec::with_capacity(layouts.len());
    let mut workloads = Vec::with_capacity(layouts.len());
    for layout in &layouts {
        let (sts, verb) = ctx
            .stores
            .statefulsets
            .create_or_patch(&ns, &layout.name, |sts| statefulset(redis, layout, &settings, sts))
            .await?;
        debug!(statefulset = %layout.name, %verb, "Ensured StatefulSet");
        verbs.push(verb);
        workloads.push(sts);
    }

    let name = redis.name_any();
    let existing = ctx.stores.statefulsets.list(&ns, &selector_labels(&name)).await?;
    for stale in existing
        .iter()
        .map(ResourceExt::name_any)
        .filter(|candidate| layouts.iter().all(|l| l.name != *candidate))
    {
        ctx.stores.statefulsets.delete_if_exists(&ns, &stale).await?;
        info!(statefulset = %stale, "Deleted StatefulSet outside the declared layout");
        verbs.push(Verb::Patched);
    }

    Ok((Verb::fold(verbs), workloads))
}

/// Ensure or remove the stats service to match `spec.monitor`.
///
/// Failures are recorded and logged, never returned.
pub async fn manage_monitor(ctx: &Context, redis: &Redis) {
    let ns = redis.namespace().unwrap_or_default();
    let name = stats_service_name(&redis.name_any());

    let result = match redis.exporter_port() {
        Some(port) if redis.monitoring_enabled() => ctx
            .stores
            .services
            .create_or_patch(&ns, &name, |svc| stats_service(redis, port, svc))
            .await
            .map(|(_, verb)| verb),
        _ => ctx
            .stores
            .services
            .delete_if_exists(&ns, &name)
            .await
            .map(|_| Verb::Unchanged),
    };

    if let Err(e) = result {
        ctx.recorder
            .record(
                &redis.object_ref(&()),
                EventType::Warning,
                reasons::FAILED_TO_CREATE,
                format!("Failed to manage monitoring system. Reason: {}", e),
            )
            .await;
        warn!(
            namespace = %ns,
            name = %redis.name_any(),
            error = %e,
            "Failed to manage monitoring system"
        );
    }
}

/// Announce what provisioning did.
pub async fn record_outcome(ctx: &Context, redis: &Redis, service: Verb, workloads: Verb) {
    let message = match (service, workloads) {
        (Verb::Created, Verb::Created) => "Successfully created Redis",
        (Verb::Patched, _) | (_, Verb::Patched) => "Successfully patched Redis",
        _ => return,
    };

    ctx.recorder
        .record(
            &redis.object_ref(&()),
            EventType::Normal,
            reasons::SUCCESSFUL,
            message.to_string(),
        )
        .await;
    info!(name = %redis.name_any(), %service, %workloads, "{}", message);
}

/// Ready pods summed over `workloads`
pub fn total_ready(workloads: &[StatefulSet]) -> i32 {
    workloads.iter().map(ready_replicas).sum()
}
