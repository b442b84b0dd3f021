//! Status updates for Redis and DormantDatabase objects
//!
//! Phases only change through [`transition_phase`], which consults the
//! lifecycle state machine before writing.

use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use kube::core::object::HasStatus;
use serde::Serialize;
use tracing::{debug, info};

use crate::controller::error::Result;
use crate::controller::state_machine::{
    LifecycleEvent, LifecycleStateMachine, TransitionContext, TransitionResult,
};
use crate::crd::{DatabasePhase, PhaseStatus, Redis};
use crate::store::{Record, ResourceStore};

/// RFC 3339 timestamp for status fields
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Check if the spec has changed since the last acted-upon generation
pub fn spec_changed(redis: &Redis) -> bool {
    let observed = redis.status.as_ref().and_then(|s| s.observed_generation);
    observed != redis.metadata.generation
}

/// Current phase, treating a missing status as `Creating`
pub fn current_phase<K>(obj: &K) -> DatabasePhase
where
    K: HasStatus,
    K::Status: PhaseStatus,
{
    obj.status().and_then(PhaseStatus::phase).unwrap_or_default()
}

/// Write `creationTime` and phase `Creating` unless already stamped.
pub async fn stamp_creation(store: &ResourceStore<Redis>, redis: &Redis) -> Result<Redis> {
    let ns = redis.namespace().unwrap_or_default();
    let name = redis.name_any();
    let stamp = now();

    let updated = store
        .update_status(&ns, &name, |mut status| {
            if status.creation_time.is_none() {
                status.creation_time = Some(stamp.clone());
                status.phase = Some(DatabasePhase::Creating);
            }
            status
        })
        .await?;

    info!(namespace = %ns, %name, "Stamped creation time");
    Ok(updated)
}

/// Apply `event` to the phase of `obj` and persist the new phase.
///
/// Returns the new phase, or `None` when the state machine rejected the
/// event and nothing was written.
pub async fn transition_phase<K>(
    store: &ResourceStore<K>,
    state_machine: &LifecycleStateMachine,
    obj: &K,
    event: LifecycleEvent,
    ctx: &TransitionContext,
    reason: Option<String>,
) -> Result<Option<DatabasePhase>>
where
    K: Record + HasStatus,
    K::Status: PhaseStatus + Default + Clone + Serialize,
{
    let ns = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let current = current_phase(obj);

    match state_machine.transition(current, event, ctx) {
        TransitionResult::Success {
            from,
            to,
            description,
            ..
        } => {
            let generation = obj.meta().generation;
            store
                .update_status(&ns, &name, |mut status| {
                    status.set_phase(to);
                    status.set_reason(reason.clone());
                    status.set_observed_generation(generation);
                    status
                })
                .await?;
            info!(namespace = %ns, %name, %from, %to, %event, "{}", description);
            Ok(Some(to))
        }
        TransitionResult::GuardFailed { reason, .. } => {
            debug!(namespace = %ns, %name, %current, %event, %reason, "Transition guard failed");
            Ok(None)
        }
        TransitionResult::InvalidTransition { .. } => {
            debug!(namespace = %ns, %name, %current, %event, "No transition for event");
            Ok(None)
        }
    }
}

/// Record `reason` as a failure: move to `Failed`, or refresh the reason if
/// already failed.
pub async fn set_failed<K>(
    store: &ResourceStore<K>,
    state_machine: &LifecycleStateMachine,
    obj: &K,
    reason: String,
) -> Result<()>
where
    K: Record + HasStatus,
    K::Status: PhaseStatus + Default + Clone + Serialize,
{
    if current_phase(obj) == DatabasePhase::Failed {
        let ns = obj.namespace().unwrap_or_default();
        store
            .update_status(&ns, &obj.name_any(), |mut status| {
                status.set_reason(Some(reason.clone()));
                status
            })
            .await?;
        return Ok(());
    }

    transition_phase(
        store,
        state_machine,
        obj,
        LifecycleEvent::ReconcileError,
        &TransitionContext::default(),
        Some(reason),
    )
    .await?;
    Ok(())
}
