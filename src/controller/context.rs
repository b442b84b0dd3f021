use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use kube::Client;

use crate::config::OperatorConfig;
use crate::controller::error::{Error, ErrorContext};
use crate::controller::state_machine::LifecycleStateMachine;
use crate::crd::{DormantDatabase, Redis};
use crate::events::{EventRecorder, KubeEventRecorder};
use crate::health::HealthState;
use crate::redis::RespTopologyProbe;
use crate::resources::WorkloadSettings;
use crate::store::{KubeRecords, Record, RecordApi, ResourceStore, RetryConfig};
use crate::topology::TopologyProbe;

/// Record stores for every kind the controllers touch
#[derive(Clone)]
pub struct Stores {
    pub databases: ResourceStore<Redis>,
    pub dormants: ResourceStore<DormantDatabase>,
    pub services: ResourceStore<Service>,
    pub statefulsets: ResourceStore<StatefulSet>,
    pub pvcs: ResourceStore<PersistentVolumeClaim>,
    pub secrets: ResourceStore<Secret>,
}

impl Stores {
    /// Stores backed by the Kubernetes API
    pub fn kube(client: &Client, config: &OperatorConfig) -> Self {
        fn store<K: Record>(client: &Client, config: &OperatorConfig) -> ResourceStore<K> {
            let api: Arc<dyn RecordApi<K>> =
                Arc::new(KubeRecords::<K>::new(client.clone(), config.field_manager.clone()));
            ResourceStore::new(api, config.retry.clone())
        }

        Self {
            databases: store(client, config),
            dormants: store(client, config),
            services: store(client, config),
            statefulsets: store(client, config),
            pvcs: store(client, config),
            secrets: store(client, config),
        }
    }

    /// Stores over arbitrary backends sharing one retry budget
    pub fn from_apis(
        retry: RetryConfig,
        databases: Arc<dyn RecordApi<Redis>>,
        dormants: Arc<dyn RecordApi<DormantDatabase>>,
        services: Arc<dyn RecordApi<Service>>,
        statefulsets: Arc<dyn RecordApi<StatefulSet>>,
        pvcs: Arc<dyn RecordApi<PersistentVolumeClaim>>,
        secrets: Arc<dyn RecordApi<Secret>>,
    ) -> Self {
        Self {
            databases: ResourceStore::new(databases, retry.clone()),
            dormants: ResourceStore::new(dormants, retry.clone()),
            services: ResourceStore::new(services, retry.clone()),
            statefulsets: ResourceStore::new(statefulsets, retry.clone()),
            pvcs: ResourceStore::new(pvcs, retry.clone()),
            secrets: ResourceStore::new(secrets, retry),
        }
    }
}

/// Shared context for the controllers
pub struct Context {
    pub config: Arc<OperatorConfig>,
    pub stores: Stores,
    pub recorder: Arc<dyn EventRecorder>,
    /// Absent when topology verification is switched off
    pub topology_probe: Option<Arc<dyn TopologyProbe>>,
    pub health_state: Option<Arc<HealthState>>,
    pub state_machine: LifecycleStateMachine,
    errors: Mutex<HashMap<String, ErrorContext>>,
}

impl Context {
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let stores = Stores::kube(&client, &config);
        let recorder: Arc<dyn EventRecorder> =
            Arc::new(KubeEventRecorder::new(client, &config.field_manager));
        let topology_probe: Option<Arc<dyn TopologyProbe>> = config.verify_topology.then(|| {
            Arc::new(RespTopologyProbe::new(
                stores.secrets.clone(),
                config.connect_timeout,
            )) as Arc<dyn TopologyProbe>
        });

        Self::from_stores(config, stores, recorder, topology_probe, health_state)
    }

    pub fn from_stores(
        config: OperatorConfig,
        stores: Stores,
        recorder: Arc<dyn EventRecorder>,
        topology_probe: Option<Arc<dyn TopologyProbe>>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            stores,
            recorder,
            topology_probe,
            health_state,
            state_machine: LifecycleStateMachine::new(),
            errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn workload_settings(&self) -> WorkloadSettings {
        WorkloadSettings {
            image_registry: self.config.image_registry.clone(),
            governing_service: self.config.governing_service.clone(),
        }
    }

    fn errors(&self) -> MutexGuard<'_, HashMap<String, ErrorContext>> {
        self.errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failure for `key`; returns the attempts so far, before this one.
    pub fn record_error(&self, key: &str, error: &Error) -> u32 {
        let mut errors = self.errors();
        let entry = errors.entry(key.to_string()).or_default();
        let attempt = entry.consecutive_errors;
        entry.record_error(error);
        attempt
    }

    pub fn reset_errors(&self, key: &str) {
        self.errors().remove(key);
    }

    pub fn error_context(&self, key: &str) -> Option<ErrorContext> {
        self.errors().get(key).cloned()
    }
}
