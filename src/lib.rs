pub mod config;
pub mod controller;
pub mod crd;
pub mod events;
pub mod health;
pub mod queue;
pub mod redis;
pub mod resources;
pub mod store;
pub mod topology;

pub use config::{ConfigError, OperatorConfig};
pub use controller::{
    Action, BackoffConfig, Context, Error, FINALIZER, Result, dormant_error_policy, error_policy,
    reconcile, reconcile_dormant,
};
pub use crd::{DormantDatabase, Redis};
pub use health::{HealthState, Metrics};
pub use queue::{ObjectKey, WorkQueue};

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use kube::core::ObjectMeta;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;

use crate::resources::{API_VERSION, KIND};

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Key of the Redis object controlling `meta`, if any
pub fn owner_key(meta: &ObjectMeta) -> Option<ObjectKey> {
    let namespace = meta.namespace.clone().unwrap_or_default();
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|owner| {
            owner.controller == Some(true) && owner.kind == KIND && owner.api_version == API_VERSION
        })
        .map(|owner| ObjectKey::new(namespace, owner.name.clone()))
}

/// Reconcile the Redis object behind `key`; returns when to look again.
pub async fn process_redis(ctx: Arc<Context>, key: ObjectKey) -> Option<Duration> {
    let redis = match ctx.stores.databases.get(&key.namespace, &key.name).await {
        Ok(Some(redis)) => Arc::new(redis),
        Ok(None) => {
            tracing::debug!(%key, "Redis no longer exists");
            ctx.reset_errors(&key.to_string());
            return None;
        }
        Err(e) => {
            tracing::warn!(%key, error = %e, "Failed to read Redis");
            return Some(BackoffConfig::default().initial_delay);
        }
    };

    let result = reconcile(redis.clone(), ctx.clone()).await;
    controller::reconciler::requeue_after(&result, redis, ctx)
}

/// Reconcile the DormantDatabase behind `key`.
pub async fn process_dormant(ctx: Arc<Context>, key: ObjectKey) -> Option<Duration> {
    let dormant = match ctx.stores.dormants.get(&key.namespace, &key.name).await {
        Ok(Some(dormant)) => Arc::new(dormant),
        Ok(None) => {
            tracing::debug!(%key, "DormantDatabase no longer exists");
            ctx.reset_errors(&format!("dormant:{}", key));
            return None;
        }
        Err(e) => {
            tracing::warn!(%key, error = %e, "Failed to read DormantDatabase");
            return Some(BackoffConfig::default().initial_delay);
        }
    };

    match reconcile_dormant(dormant.clone(), ctx.clone()).await {
        Ok(action) => {
            ctx.reset_errors(&format!("dormant:{}", key));
            action.requeue_after()
        }
        Err(e) => dormant_error_policy(dormant, &e, ctx).requeue_after(),
    }
}

/// Feed keys from a watch on `api` into `queue`.
async fn watch_into<K, F>(api: Api<K>, queue: Arc<WorkQueue>, to_key: F)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
    F: Fn(&K) -> Option<ObjectKey> + Send,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let mut stream = watcher::watcher(api, WatcherConfig::default().any_semantic())
        .default_backoff()
        .touched_objects()
        .boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(obj) => {
                if let Some(key) = to_key(&obj) {
                    tracing::trace!(%kind, %key, "Queueing");
                    queue.add(key);
                }
            }
            Err(e) => tracing::warn!(%kind, "Watch error: {}", e),
        }
    }
    tracing::error!(%kind, "Watch stream ended unexpectedly");
}

/// Queues and workers for both controllers
pub struct Operator {
    ctx: Arc<Context>,
    redis_queue: Arc<WorkQueue>,
    dormant_queue: Arc<WorkQueue>,
}

impl Operator {
    pub fn new(ctx: Arc<Context>) -> Self {
        let capacity = ctx.config.queue_capacity;
        Self {
            ctx,
            redis_queue: Arc::new(WorkQueue::new(capacity)),
            dormant_queue: Arc::new(WorkQueue::new(capacity)),
        }
    }

    /// Watch every relevant kind and reconcile until the queues shut down.
    pub async fn run(&self, client: Client) {
        let namespace = self.ctx.config.watch_namespace.clone();
        let namespace = namespace.as_deref();
        let workers = self.ctx.config.worker_count;
        tracing::info!(
            "Starting controllers for Redis and DormantDatabase resources (scope: {})",
            namespace.unwrap_or("cluster-wide")
        );

        let redis_key =
            |obj: &Redis| Some(ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any()));
        let dormant_key = |obj: &DormantDatabase| {
            Some(ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any()))
        };

        let watches = futures::future::join_all(vec![
            watch_into(
                scoped_api::<Redis>(client.clone(), namespace),
                self.redis_queue.clone(),
                redis_key,
            )
            .boxed(),
            watch_into(
                scoped_api::<StatefulSet>(client.clone(), namespace),
                self.redis_queue.clone(),
                |obj: &StatefulSet| owner_key(&obj.metadata),
            )
            .boxed(),
            watch_into(
                scoped_api::<Service>(client.clone(), namespace),
                self.redis_queue.clone(),
                |obj: &Service| owner_key(&obj.metadata),
            )
            .boxed(),
            watch_into(
                scoped_api::<PersistentVolumeClaim>(client.clone(), namespace),
                self.redis_queue.clone(),
                |obj: &PersistentVolumeClaim| owner_key(&obj.metadata),
            )
            .boxed(),
            watch_into(
                scoped_api::<Secret>(client.clone(), namespace),
                self.redis_queue.clone(),
                |obj: &Secret| owner_key(&obj.metadata),
            )
            .boxed(),
            watch_into(
                scoped_api::<DormantDatabase>(client.clone(), namespace),
                self.dormant_queue.clone(),
                dormant_key,
            )
            .boxed(),
        ]);

        let redis_workers = {
            let ctx = self.ctx.clone();
            let depth = (self.redis_queue.clone(), self.dormant_queue.clone());
            queue::run_workers(self.redis_queue.clone(), workers, move |key| {
                let ctx = ctx.clone();
                let depth = depth.clone();
                async move {
                    if let Some(health) = &ctx.health_state {
                        health.metrics.set_queue_depth((depth.0.len() + depth.1.len()) as i64);
                    }
                    process_redis(ctx, key).await
                }
            })
        };
        let dormant_workers = {
            let ctx = self.ctx.clone();
            queue::run_workers(self.dormant_queue.clone(), workers, move |key| {
                process_dormant(ctx.clone(), key)
            })
        };

        if let Some(health) = &self.ctx.health_state {
            health.set_ready(true).await;
        }

        tokio::select! {
            _ = watches => tracing::error!("Watches ended unexpectedly"),
            _ = futures::future::join(redis_workers, dormant_workers) => {
                tracing::info!("Workers stopped");
            }
        }
    }

    /// Stop handing out keys; workers exit after their current reconcile.
    pub fn shutdown(&self) {
        self.redis_queue.shutdown();
        self.dormant_queue.shutdown();
    }
}

