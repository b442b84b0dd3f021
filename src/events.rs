//! Kubernetes event publishing
//!
//! Events are fire-and-forget: a failed publish is logged and never surfaces
//! to the reconcile that produced it.

use std::sync::{Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use tracing::warn;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl From<EventType> for KubeEventType {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Normal => KubeEventType::Normal,
            EventType::Warning => KubeEventType::Warning,
        }
    }
}

/// Event reasons
pub mod reasons {
    pub const INVALID: &str = "Invalid";
    pub const FAILED_TO_UPDATE: &str = "FailedToUpdate";
    pub const FAILED_TO_GET: &str = "FailedToGet";
    pub const FAILED_TO_CREATE: &str = "FailedToCreate";
    pub const FAILED_TO_DELETE: &str = "FailedToDelete";
    pub const FAILED_TO_WIPE_OUT: &str = "FailedToWipeOut";
    pub const SUCCESSFUL: &str = "Successful";
    pub const SUCCESSFUL_CREATE: &str = "SuccessfulCreate";
    pub const SUCCESSFUL_WIPE_OUT: &str = "SuccessfulWipeOut";
    pub const TERMINATION_BLOCKED: &str = "TerminationBlocked";
    pub const TOPOLOGY_TIMEOUT: &str = "TopologyTimeout";
}

/// Sink for events about operator-managed objects.
pub trait EventRecorder: Send + Sync {
    fn record<'a>(
        &'a self,
        object: &'a ObjectReference,
        type_: EventType,
        reason: &'a str,
        message: String,
    ) -> BoxFuture<'a, ()>;
}

/// Publishes through the `events.k8s.io` API.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

impl EventRecorder for KubeEventRecorder {
    fn record<'a>(
        &'a self,
        object: &'a ObjectReference,
        type_: EventType,
        reason: &'a str,
        message: String,
    ) -> BoxFuture<'a, ()> {
        async move {
            let event = Event {
                type_: type_.into(),
                reason: reason.to_string(),
                note: Some(message),
                action: "Reconcile".to_string(),
                secondary: None,
            };
            if let Err(e) = self.recorder.publish(&event, object).await {
                warn!(
                    object = object.name.as_deref().unwrap_or_default(),
                    reason,
                    error = %e,
                    "Failed to publish event"
                );
            }
        }
        .boxed()
    }
}

/// An event captured by [`MemoryEventRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

/// Keeps events in memory for inspection.
#[derive(Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.reason.clone()).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl EventRecorder for MemoryEventRecorder {
    fn record<'a>(
        &'a self,
        object: &'a ObjectReference,
        type_: EventType,
        reason: &'a str,
        message: String,
    ) -> BoxFuture<'a, ()> {
        let object = format!(
            "{}/{}",
            object.namespace.as_deref().unwrap_or_default(),
            object.name.as_deref().unwrap_or_default()
        );
        self.lock().push(RecordedEvent {
            object,
            type_,
            reason: reason.to_string(),
            message,
        });
        futures::future::ready(()).boxed()
    }
}
