pub mod action;
pub mod context;
pub mod dormant;
pub mod dormant_reconciler;
pub mod error;
pub mod provision;
pub mod reconciler;
pub mod state_machine;
pub mod status;
pub mod validation;

pub use action::Action;
pub use context::{Context, Stores};
pub use dormant::{DormantMatch, match_dormant, pause, wipe_out_dependents};
pub use dormant_reconciler::{dormant_error_policy, reconcile_dormant};
pub use error::{BackoffConfig, Error, ErrorContext, Result};
pub use reconciler::{FINALIZER, error_policy, reconcile};
pub use state_machine::{LifecycleEvent, LifecycleStateMachine, TransitionContext, TransitionResult};
pub use status::spec_changed;
pub use validation::{MAX_MASTERS, MAX_REPLICAS_PER_MASTER, MIN_MASTERS, validate_spec};
