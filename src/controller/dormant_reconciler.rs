//! Reconciliation of DormantDatabase records
//!
//! A dormant record sits in `Dormant` until a user flips one of its triggers:
//! `spec.wipeOut` deletes everything the paused database left behind, and
//! `spec.resume` recreates the database from the stored snapshot. Wipe-out
//! wins when both are set.

use std::sync::Arc;
use std::time::Instant;

use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::action::Action;
use crate::controller::context::Context;
use crate::controller::dormant::wipe_out_dependents;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::state_machine::{LifecycleEvent, TransitionContext};
use crate::controller::status::{current_phase, now, set_failed, transition_phase};
use crate::crd::{DatabaseKind, DatabasePhase, DormantDatabase, LABEL_DATABASE_KIND, Redis};
use crate::events::{EventType, reasons};
use crate::store::{StoreError, Verb};

const METRICS_KIND: &str = "DormantDatabase";

#[instrument(
    skip(dormant, ctx),
    fields(name = %dormant.name_any(), namespace = dormant.namespace().unwrap_or_default())
)]
pub async fn reconcile_dormant(dormant: Arc<DormantDatabase>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = dormant.namespace().unwrap_or_default();
    let name = dormant.name_any();

    if dormant.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let kind = dormant
        .labels()
        .get(LABEL_DATABASE_KIND)
        .and_then(|kind| kind.parse::<DatabaseKind>().ok());
    if kind != Some(DatabaseKind::Redis) {
        debug!(?kind, "DormantDatabase belongs to another kind, skipping");
        return Ok(Action::await_change());
    }

    info!("Reconciling DormantDatabase");
    let result = reconcile_record(&dormant, &ctx).await;

    if let Some(health) = &ctx.health_state {
        health
            .metrics
            .record_reconcile(METRICS_KIND, &ns, &name, started.elapsed().as_secs_f64());
    }
    result
}

pub fn dormant_error_policy(
    dormant: Arc<DormantDatabase>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    let ns = dormant.namespace().unwrap_or_default();
    let name = dormant.name_any();
    let key = format!("dormant:{}/{}", ns, name);

    let attempt = ctx.record_error(&key, error);
    let delay = BackoffConfig::default().delay_for_error(error, attempt);

    if let Some(health) = &ctx.health_state {
        health.metrics.record_error(METRICS_KIND, &ns, &name);
    }
    if error.is_retryable() {
        warn!(%key, attempt, "Retryable error: {}, requeuing in {:?}", error, delay);
    } else {
        error!(%key, "Non-retryable error: {}, requeuing in {:?}", error, delay);
    }

    Action::requeue(delay)
}

async fn reconcile_record(dormant: &DormantDatabase, ctx: &Context) -> Result<Action> {
    let dormant = ensure_dormant(ctx, dormant).await?;

    if dormant.spec.wipe_out {
        return wipe_out(ctx, &dormant).await;
    }
    if dormant.spec.resume {
        return resume(ctx, &dormant).await;
    }
    Ok(Action::await_change())
}

/// Walk a fresh or half-paused record forward to `Dormant`.
async fn ensure_dormant(ctx: &Context, dormant: &DormantDatabase) -> Result<DormantDatabase> {
    let mut dormant = dormant.clone();
    for event in [LifecycleEvent::PauseRequested, LifecycleEvent::SnapshotStored] {
        let moved = transition_phase(
            &ctx.stores.dormants,
            &ctx.state_machine,
            &dormant,
            event,
            &TransitionContext::default(),
            None,
        )
        .await?;
        if moved.is_some() {
            dormant = refresh(ctx, &dormant).await?;
        }
    }
    Ok(dormant)
}

async fn wipe_out(ctx: &Context, dormant: &DormantDatabase) -> Result<Action> {
    let ns = dormant.namespace().unwrap_or_default();
    let name = dormant.name_any();
    let object = dormant.object_ref(&());

    let dormant = match current_phase(dormant) {
        DatabasePhase::Dormant => {
            transition_phase(
                &ctx.stores.dormants,
                &ctx.state_machine,
                dormant,
                LifecycleEvent::WipeOutRequested,
                &TransitionContext::default(),
                None,
            )
            .await?;
            refresh(ctx, dormant).await?
        }
        DatabasePhase::WipeOut => dormant.clone(),
        phase => {
            debug!(%phase, "Not dormant, wipe-out deferred");
            return Ok(Action::await_change());
        }
    };

    if dormant.status.as_ref().and_then(|s| s.wipe_out_time.as_ref()).is_some() {
        return Ok(Action::await_change());
    }

    let origin = &dormant.spec.origin.metadata;
    let origin_ns = if origin.namespace.is_empty() { ns.clone() } else { origin.namespace.clone() };
    let origin_name = if origin.name.is_empty() { name.clone() } else { origin.name.clone() };

    let deleted = match wipe_out_dependents(ctx, &origin_ns, &origin_name).await {
        Ok(deleted) => deleted,
        Err(e) => {
            ctx.recorder
                .record(
                    &object,
                    EventType::Warning,
                    reasons::FAILED_TO_WIPE_OUT,
                    format!("Failed to wipeOut. Reason: {}", e),
                )
                .await;
            return Err(e);
        }
    };

    let stamp = now();
    ctx.stores
        .dormants
        .update_status(&ns, &name, |mut status| {
            status.wipe_out_time = Some(stamp.clone());
            status
        })
        .await?;

    ctx.recorder
        .record(
            &object,
            EventType::Normal,
            reasons::SUCCESSFUL_WIPE_OUT,
            "Successfully wiped out DormantDatabase".to_string(),
        )
        .await;
    info!(deleted, "Wiped out DormantDatabase");
    Ok(Action::await_change())
}

async fn resume(ctx: &Context, dormant: &DormantDatabase) -> Result<Action> {
    let ns = dormant.namespace().unwrap_or_default();
    let name = dormant.name_any();
    let object = dormant.object_ref(&());

    match current_phase(dormant) {
        DatabasePhase::Dormant => {
            transition_phase(
                &ctx.stores.dormants,
                &ctx.state_machine,
                dormant,
                LifecycleEvent::ResumeRequested,
                &TransitionContext::default(),
                None,
            )
            .await?;
        }
        DatabasePhase::Resuming => {}
        phase => {
            debug!(%phase, "Not dormant, resume deferred");
            return Ok(Action::await_change());
        }
    }

    let Some(spec) = dormant.spec.origin.spec.redis.clone() else {
        let reason = "DormantDatabase carries no Redis spec to resume from".to_string();
        ctx.recorder
            .record(&object, EventType::Warning, reasons::FAILED_TO_CREATE, reason.clone())
            .await;
        let current = refresh(ctx, dormant).await?;
        set_failed(&ctx.stores.dormants, &ctx.state_machine, &current, reason.clone()).await?;
        return Err(Error::FatalMismatch(reason));
    };

    let origin = &dormant.spec.origin.metadata;
    let (_, verb) = ctx
        .stores
        .databases
        .create_or_patch(&ns, &name, |redis: Redis| {
            if redis.metadata.uid.is_some() {
                return redis;
            }
            let mut redis = redis;
            redis.metadata.labels = Some(origin.labels.clone()).filter(|l| !l.is_empty());
            redis.metadata.annotations = Some(origin.annotations.clone()).filter(|a| !a.is_empty());
            redis.spec = spec.clone();
            redis
        })
        .await?;

    if verb == Verb::Created {
        ctx.recorder
            .record(
                &object,
                EventType::Normal,
                reasons::SUCCESSFUL_CREATE,
                format!(r#"Successfully created Redis: "{}""#, name),
            )
            .await;
        info!("Recreated Redis from DormantDatabase");
    } else {
        debug!("Redis already exists, waiting for it to take over");
    }
    Ok(Action::await_change())
}

async fn refresh(ctx: &Context, dormant: &DormantDatabase) -> Result<DormantDatabase> {
    let ns = dormant.namespace().unwrap_or_default();
    let name = dormant.name_any();
    ctx.stores
        .dormants
        .get(&ns, &name)
        .await?
        .ok_or_else(|| {
            Error::StoreError(StoreError::NotFound {
                kind: "DormantDatabase".to_string(),
                namespace: ns,
                name,
            })
        })
}
