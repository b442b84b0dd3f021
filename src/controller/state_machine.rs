//! Formal finite state machine for database lifecycle phases
//!
//! Every phase written to a Redis or DormantDatabase status goes through this
//! table, so only the lifecycle paths below can be recorded:
//!
//! ```text
//! Creating -> Running -> Pausing -> Dormant -> Resuming -> (Creating)
//!                                     \-> WipeOut
//! Creating/Running -> Failed -> Creating
//! ```

use std::fmt;

use crate::crd::DatabasePhase;

/// Events that trigger lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Every desired pod is ready
    AllReplicasReady,
    /// Pods went missing after the database was running
    ReplicasNotReady,
    /// A reconcile step failed
    ReconcileError,
    /// A failed database is being provisioned again
    RecoveryInitiated,
    /// Deletion with the Pause termination policy
    PauseRequested,
    /// The dormant snapshot has been stored
    SnapshotStored,
    /// The dormant record asked for a resume
    ResumeRequested,
    /// The dormant record asked for its data to be wiped
    WipeOutRequested,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::AllReplicasReady => "AllReplicasReady",
            LifecycleEvent::ReplicasNotReady => "ReplicasNotReady",
            LifecycleEvent::ReconcileError => "ReconcileError",
            LifecycleEvent::RecoveryInitiated => "RecoveryInitiated",
            LifecycleEvent::PauseRequested => "PauseRequested",
            LifecycleEvent::SnapshotStored => "SnapshotStored",
            LifecycleEvent::ResumeRequested => "ResumeRequested",
            LifecycleEvent::WipeOutRequested => "WipeOutRequested",
        };
        f.write_str(name)
    }
}

/// Readiness figures checked by transition guards
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    pub ready_replicas: i32,
    pub desired_replicas: i32,
}

impl TransitionContext {
    pub fn new(ready_replicas: i32, desired_replicas: i32) -> Self {
        Self {
            ready_replicas,
            desired_replicas,
        }
    }

    pub fn all_replicas_ready(&self) -> bool {
        self.ready_replicas >= self.desired_replicas
    }
}

#[derive(Debug)]
pub struct Transition {
    pub from: DatabasePhase,
    pub to: DatabasePhase,
    pub event: LifecycleEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: DatabasePhase,
        to: DatabasePhase,
        event: LifecycleEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: DatabasePhase,
        to: DatabasePhase,
        event: LifecycleEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: DatabasePhase,
        event: LifecycleEvent,
    },
    GuardFailed {
        from: DatabasePhase,
        to: DatabasePhase,
        event: LifecycleEvent,
        reason: String,
    },
}

pub struct LifecycleStateMachine {
    transitions: Vec<Transition>,
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleStateMachine {
    pub fn new() -> Self {
        use DatabasePhase::*;
        use LifecycleEvent::*;

        Self {
            transitions: vec![
                // === Creating ===
                Transition::new(
                    Creating,
                    Running,
                    AllReplicasReady,
                    "All pods ready, database is running",
                ),
                Transition::new(Creating, Failed, ReconcileError, "Error while provisioning"),
                Transition::new(Creating, Pausing, PauseRequested, "Deleted before becoming ready"),
                // === Running ===
                Transition::new(
                    Running,
                    Creating,
                    ReplicasNotReady,
                    "Pods not ready, reprovisioning",
                ),
                Transition::new(Running, Failed, ReconcileError, "Error while running"),
                Transition::new(Running, Pausing, PauseRequested, "Deleted, pausing database"),
                // === Failed ===
                Transition::new(
                    Failed,
                    Creating,
                    RecoveryInitiated,
                    "Provisioning again after failure",
                ),
                Transition::new(Failed, Running, AllReplicasReady, "Recovered, all pods ready"),
                Transition::new(Failed, Pausing, PauseRequested, "Deleted while failed"),
                // === Pausing ===
                Transition::new(Pausing, Dormant, SnapshotStored, "Dormant snapshot stored"),
                Transition::new(Pausing, Failed, ReconcileError, "Error while pausing"),
                // === Dormant ===
                Transition::new(
                    Dormant,
                    Resuming,
                    ResumeRequested,
                    "Resuming from dormant snapshot",
                ),
                Transition::new(Dormant, WipeOut, WipeOutRequested, "Wiping out dormant data"),
                // === Resuming ===
                Transition::new(Resuming, Failed, ReconcileError, "Error while resuming"),
                // WipeOut is terminal
            ],
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: DatabasePhase,
        event: LifecycleEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event);

        match transition {
            Some(t) => match self.check_guard(t, ctx) {
                Some(reason) => TransitionResult::GuardFailed {
                    from: t.from,
                    to: t.to,
                    event,
                    reason,
                },
                None => TransitionResult::Success {
                    from: t.from,
                    to: t.to,
                    event,
                    description: t.description,
                },
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: DatabasePhase, event: LifecycleEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: DatabasePhase) -> Vec<LifecycleEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match (transition.to, transition.event) {
            (DatabasePhase::Running, LifecycleEvent::AllReplicasReady)
                if !ctx.all_replicas_ready() =>
            {
                Some(format!(
                    "Not all pods ready: {}/{}",
                    ctx.ready_replicas, ctx.desired_replicas
                ))
            }
            (DatabasePhase::Creating, LifecycleEvent::ReplicasNotReady)
                if ctx.all_replicas_ready() =>
            {
                Some(format!(
                    "All pods ready: {}/{}",
                    ctx.ready_replicas, ctx.desired_replicas
                ))
            }
            _ => None,
        }
    }
}

/// Pick the readiness event for a provisioned database
pub fn readiness_event(ctx: &TransitionContext) -> LifecycleEvent {
    if ctx.all_replicas_ready() {
        LifecycleEvent::AllReplicasReady
    } else {
        LifecycleEvent::ReplicasNotReady
    }
}
