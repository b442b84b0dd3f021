//! Reconciliation logic for Redis resources
//!
//! A pass runs in strict order: validate, stamp creation, default the
//! exporter port, match any dormant twin, provision services and workloads,
//! report the outcome, manage monitoring, track readiness and, for clusters
//! that just changed shape, wait for the hash-slot topology to converge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::action::Action;
use crate::controller::context::Context;
use crate::controller::dormant::{match_dormant, pause, wipe_out_dependents};
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::provision::{
    default_monitor_port, ensure_governing_service, ensure_service, ensure_statefulsets,
    manage_monitor, record_outcome, total_ready,
};
use crate::controller::state_machine::{LifecycleEvent, TransitionContext, readiness_event};
use crate::controller::status::{
    current_phase, set_failed, spec_changed, stamp_creation, transition_phase,
};
use crate::controller::validation::validate_spec;
use crate::crd::{DatabasePhase, Redis, TerminationPolicy};
use crate::events::{EventType, reasons};
use crate::resources::{REDIS_PORT, shard_name};
use crate::store::{StoreError, Verb};
use crate::topology::{ExpectedTopology, ProbeTarget, TopologyError, wait_for_topology};

/// Finalizer name for termination policies
pub const FINALIZER: &str = "kubedb.example.com/finalizer";

/// Kind label on metrics
const METRICS_KIND: &str = "Redis";

/// Main reconciliation function
#[instrument(
    skip(redis, ctx),
    fields(name = %redis.name_any(), namespace = redis.namespace().unwrap_or_default())
)]
pub async fn reconcile(redis: Arc<Redis>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();

    info!("Reconciling Redis");

    let result = if redis.metadata.deletion_timestamp.is_some() {
        handle_deletion(&redis, &ctx).await
    } else {
        reconcile_redis(&redis, &ctx).await
    };

    if let Some(health) = &ctx.health_state {
        health
            .metrics
            .record_reconcile(METRICS_KIND, &ns, &name, started.elapsed().as_secs_f64());
        if result.is_ok() {
            health.touch();
        }
    }

    match result {
        Ok(action) => {
            info!("Reconciliation completed successfully");
            Ok(action)
        }
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            Err(e)
        }
    }
}

/// Error policy with exponential backoff per object
pub fn error_policy(redis: Arc<Redis>, error: &Error, ctx: Arc<Context>) -> Action {
    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();
    let key = format!("{}/{}", ns, name);

    let attempt = ctx.record_error(&key, error);
    let delay = BackoffConfig::default().delay_for_error(error, attempt);

    if let Some(health) = &ctx.health_state {
        health.metrics.record_error(METRICS_KIND, &ns, &name);
    }

    if error.is_retryable() {
        warn!(%key, attempt, "Retryable error: {}, requeuing in {:?}", error, delay);
    } else {
        error!(
            %key,
            "Non-retryable error: {}, requeuing in {:?} for manual intervention", error, delay
        );
    }

    Action::requeue(delay)
}

async fn reconcile_redis(redis: &Redis, ctx: &Context) -> Result<Action> {
    let redis = if has_finalizer(redis) {
        redis.clone()
    } else {
        add_finalizer(redis, ctx).await?
    };

    if let Err(e) = validate_spec(&redis) {
        warn!("Invalid Redis: {}", e);
        ctx.recorder
            .record(&redis.object_ref(&()), EventType::Warning, reasons::INVALID, e.to_string())
            .await;
        return Ok(Action::await_change());
    }

    match provision(&redis, ctx).await {
        Ok(action) => Ok(action),
        Err(e) => {
            mark_failed(ctx, &redis, &e).await;
            Err(e)
        }
    }
}

/// Steps after validation; any error here marks the object `Failed`.
async fn provision(redis: &Redis, ctx: &Context) -> Result<Action> {
    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();

    let mut redis = redis.clone();
    if redis.status.as_ref().and_then(|s| s.creation_time.as_ref()).is_none() {
        redis = match stamp_creation(&ctx.stores.databases, &redis).await {
            Ok(updated) => updated,
            Err(e) => {
                ctx.recorder
                    .record(
                        &redis.object_ref(&()),
                        EventType::Warning,
                        reasons::FAILED_TO_UPDATE,
                        e.to_string(),
                    )
                    .await;
                return Err(e);
            }
        };
    }

    if current_phase(&redis) == DatabasePhase::Failed && spec_changed(&redis) {
        transition_phase(
            &ctx.stores.databases,
            &ctx.state_machine,
            &redis,
            LifecycleEvent::RecoveryInitiated,
            &TransitionContext::default(),
            None,
        )
        .await?;
        redis = refresh(ctx, &redis).await?;
    }

    let redis = default_monitor_port(ctx, &redis).await?;

    let resumed = match_dormant(ctx, &redis).await?;
    debug!(?resumed, "Checked for dormant twin");

    ensure_governing_service(ctx, &redis).await?;
    let service_verb = ensure_service(ctx, &redis).await?;
    let (workload_verb, workloads) = ensure_statefulsets(ctx, &redis).await?;

    record_outcome(ctx, &redis, service_verb, workload_verb).await;
    manage_monitor(ctx, &redis).await;

    let ready = total_ready(&workloads);
    let desired = redis.total_pods();
    if let Some(health) = &ctx.health_state {
        health.metrics.set_pods_ready(&ns, &name, i64::from(ready));
    }

    let redis = refresh(ctx, &redis).await?;
    let readiness = TransitionContext::new(ready, desired);
    let was_running = current_phase(&redis) == DatabasePhase::Running;
    let phase = transition_phase(
        &ctx.stores.databases,
        &ctx.state_machine,
        &redis,
        readiness_event(&readiness),
        &readiness,
        None,
    )
    .await?;

    if !readiness.all_replicas_ready() {
        info!(ready, desired, "Waiting for pods");
        return Ok(Action::requeue(ctx.config.pending_requeue));
    }

    let became_running = !was_running && phase == Some(DatabasePhase::Running);
    if redis.is_cluster() && (workload_verb == Verb::Patched || became_running) {
        verify_topology(ctx, &redis).await?;
    }

    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Wait for the cluster's slot map to match the declared shape.
async fn verify_topology(ctx: &Context, redis: &Redis) -> Result<()> {
    let Some(probe) = ctx.topology_probe.as_ref() else {
        return Ok(());
    };

    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();
    let masters = u32::try_from(redis.masters()).map_err(|_| TopologyError::InvalidMasterCount(0))?;
    let replicas = u32::try_from(redis.replicas_per_master()).unwrap_or(0);
    let expected = ExpectedTopology::new(masters, replicas)?;

    let target = ProbeTarget {
        namespace: ns.clone(),
        database: name.clone(),
        host: format!(
            "{}-0.{}.{}.svc",
            shard_name(&name, 0),
            ctx.config.governing_service,
            ns
        ),
        port: REDIS_PORT as u16,
        tls: redis.tls_enabled(),
    };

    match wait_for_topology(probe.as_ref(), &target, &expected, &ctx.config.topology_poll).await {
        Ok(observed) => {
            info!(nodes = observed.node_count(), masters, replicas, "Cluster topology verified");
            if let Some(health) = &ctx.health_state {
                health.metrics.record_topology("converged");
            }
            Ok(())
        }
        Err(e) => {
            ctx.recorder
                .record(
                    &redis.object_ref(&()),
                    EventType::Warning,
                    reasons::TOPOLOGY_TIMEOUT,
                    e.to_string(),
                )
                .await;
            if let Some(health) = &ctx.health_state {
                health.metrics.record_topology("timeout");
            }
            Err(e.into())
        }
    }
}

/// Run the termination policy and release the finalizer.
async fn handle_deletion(redis: &Redis, ctx: &Context) -> Result<Action> {
    if !has_finalizer(redis) {
        return Ok(Action::await_change());
    }

    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();
    let policy = redis.spec.termination_policy;
    info!(?policy, "Handling deletion");

    match policy {
        TerminationPolicy::DoNotTerminate => {
            ctx.recorder
                .record(
                    &redis.object_ref(&()),
                    EventType::Warning,
                    reasons::TERMINATION_BLOCKED,
                    format!(
                        r#"Redis "{}" has terminationPolicy DoNotTerminate; change it to allow deletion"#,
                        name
                    ),
                )
                .await;
            return Ok(Action::await_change());
        }
        TerminationPolicy::Pause => {
            if let Err(e) = pause(ctx, redis).await {
                mark_failed(ctx, redis, &e).await;
                return Err(e);
            }
        }
        TerminationPolicy::Delete => {
            debug!("Leaving dependents to garbage collection");
        }
        TerminationPolicy::WipeOut => {
            let deleted = wipe_out_dependents(ctx, &ns, &name).await?;
            ctx.stores.dormants.delete_if_exists(&ns, &name).await?;
            ctx.recorder
                .record(
                    &redis.object_ref(&()),
                    EventType::Normal,
                    reasons::SUCCESSFUL_WIPE_OUT,
                    format!(r#"Successfully wiped out Redis: "{}""#, name),
                )
                .await;
            info!(deleted, "Wiped out Redis");
        }
    }

    remove_finalizer(redis, ctx).await?;
    ctx.reset_errors(&format!("{}/{}", ns, name));
    Ok(Action::await_change())
}

/// Best-effort `Failed` phase with the error as reason
async fn mark_failed(ctx: &Context, redis: &Redis, err: &Error) {
    let current = match refresh(ctx, redis).await {
        Ok(current) => current,
        Err(e) => {
            debug!(error = %e, "Could not re-read Redis to mark it failed");
            return;
        }
    };
    let reason = err.to_string();
    if let Err(e) = set_failed(&ctx.stores.databases, &ctx.state_machine, &current, reason).await {
        warn!(error = %e, "Failed to update status to Failed");
    }
}

async fn refresh(ctx: &Context, redis: &Redis) -> Result<Redis> {
    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();
    ctx.stores
        .databases
        .get(&ns, &name)
        .await?
        .ok_or_else(|| {
            Error::StoreError(StoreError::NotFound {
                kind: "Redis".to_string(),
                namespace: ns,
                name,
            })
        })
}

/// Check if the finalizer is present
fn has_finalizer(redis: &Redis) -> bool {
    redis.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer with a version-guarded write.
///
/// The finalizer list is re-read on every attempt, so entries written by
/// others in the meantime survive.
async fn add_finalizer(redis: &Redis, ctx: &Context) -> Result<Redis> {
    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();
    let updated = ctx
        .stores
        .databases
        .try_update(&ns, &name, |mut current| {
            let finalizers = current.finalizers_mut();
            if !finalizers.iter().any(|f| f == FINALIZER) {
                finalizers.push(FINALIZER.to_string());
            }
            current
        })
        .await?;
    info!("Added finalizer to {}", name);
    Ok(updated)
}

async fn remove_finalizer(redis: &Redis, ctx: &Context) -> Result<()> {
    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();
    let result = ctx
        .stores
        .databases
        .try_update(&ns, &name, |mut current| {
            current.finalizers_mut().retain(|f| f != FINALIZER);
            current
        })
        .await;

    match result {
        Ok(_) => {
            info!("Removed finalizer from {}", name);
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Requeue delay for a pass that ended in `result`
pub fn requeue_after(
    result: &Result<Action>,
    redis: Arc<Redis>,
    ctx: Arc<Context>,
) -> Option<Duration> {
    match result {
        Ok(action) => {
            ctx.reset_errors(&format!(
                "{}/{}",
                redis.namespace().unwrap_or_default(),
                redis.name_any()
            ));
            action.requeue_after()
        }
        Err(e) => error_policy(redis, e, ctx).requeue_after(),
    }
}
