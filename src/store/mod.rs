//! Optimistic-concurrency record store
//!
//! `ResourceStore` layers the create-or-patch and retrying-update protocols on
//! top of any [`RecordApi`] backend. Every mutation of a database record goes
//! through here.

mod api;
mod error;
mod memory;
pub mod patch;

pub use api::{KubeRecords, Record, RecordApi, kind_of, label_selector};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryRecords;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use kube::core::object::HasStatus;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use patch::{create_merge_patch, is_empty_patch};

/// Outcome of a create-or-patch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Unchanged,
    Created,
    Patched,
}

impl Verb {
    /// Fold several verbs into one: `Created` only if every input was
    /// created, `Patched` if anything changed, `Unchanged` otherwise.
    pub fn fold<I: IntoIterator<Item = Verb>>(verbs: I) -> Verb {
        let mut all_created = true;
        let mut any_changed = false;
        let mut any = false;
        for verb in verbs {
            any = true;
            all_created &= verb == Verb::Created;
            any_changed |= verb != Verb::Unchanged;
        }
        match (any, all_created, any_changed) {
            (true, true, _) => Verb::Created,
            (_, _, true) => Verb::Patched,
            _ => Verb::Unchanged,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Unchanged => write!(f, "unchanged"),
            Verb::Created => write!(f, "created"),
            Verb::Patched => write!(f, "patched"),
        }
    }
}

/// Attempt budget for version-guarded writes
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Sleep between attempts after a conflict
    pub interval: Duration,
    /// Total attempts before giving up
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            max_attempts: 5,
        }
    }
}

pub struct ResourceStore<K> {
    api: Arc<dyn RecordApi<K>>,
    retry: RetryConfig,
}

impl<K> Clone for ResourceStore<K> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<K: Record> ResourceStore<K> {
    pub fn new(api: Arc<dyn RecordApi<K>>, retry: RetryConfig) -> Self {
        Self { api, retry }
    }

    pub fn api(&self) -> &Arc<dyn RecordApi<K>> {
        &self.api
    }

    pub async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<K>> {
        self.api.get(namespace, name).await
    }

    pub async fn list(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<K>> {
        self.api.list(namespace, selector).await
    }

    /// Create the record if absent, otherwise patch it toward `transform`.
    ///
    /// An absent record starts from `K::default()` carrying only its identity.
    /// A present one is transformed as a copy and diffed against the stored
    /// form; an empty diff is `Unchanged` and sends nothing.
    pub async fn create_or_patch<F>(
        &self,
        namespace: &str,
        name: &str,
        transform: F,
    ) -> StoreResult<(K, Verb)>
    where
        F: Fn(K) -> K + Send + Sync,
    {
        match self.api.get(namespace, name).await? {
            Some(current) => self.patch(&current, transform).await,
            None => {
                let mut fresh = K::default();
                fresh.meta_mut().name = Some(name.to_string());
                fresh.meta_mut().namespace = Some(namespace.to_string());
                let desired = transform(fresh);

                debug!(kind = %kind_of::<K>(), %namespace, %name, "Creating");
                let created = self.api.create(namespace, &desired).await?;
                Ok((created, Verb::Created))
            }
        }
    }

    /// Patch `current` toward `transform(current)`.
    pub async fn patch<F>(&self, current: &K, transform: F) -> StoreResult<(K, Verb)>
    where
        F: Fn(K) -> K + Send + Sync,
    {
        let modified = transform(current.clone());
        self.patch_object(current, &modified).await
    }

    /// Send the merge patch between two versions of the same record.
    pub async fn patch_object(&self, current: &K, modified: &K) -> StoreResult<(K, Verb)> {
        let namespace = current.namespace().unwrap_or_default();
        let name = current.name_any();

        let patch = create_merge_patch(
            &serde_json::to_value(current)?,
            &serde_json::to_value(modified)?,
        );
        if is_empty_patch(&patch) {
            return Ok((current.clone(), Verb::Unchanged));
        }

        debug!(kind = %kind_of::<K>(), %namespace, %name, %patch, "Patching");
        let patched = self.api.patch_merge(&namespace, &name, &patch).await?;
        Ok((patched, Verb::Patched))
    }

    /// Read-modify-write with the read version until it lands.
    ///
    /// Conflicts sleep the configured interval and retry; a vanished record
    /// aborts at once.
    pub async fn try_update<F>(&self, namespace: &str, name: &str, transform: F) -> StoreResult<K>
    where
        F: Fn(K) -> K + Send + Sync,
    {
        let transform = &transform;
        let api = &self.api;
        self.retry_guarded(namespace, name, move |current: K| async move {
            let desired = transform(current);
            api.replace(namespace, &desired).await
        })
        .await
    }

    /// Like [`ResourceStore::try_update`], restricted to the status
    /// subresource. Spec and metadata are never written.
    pub async fn update_status<F>(
        &self,
        namespace: &str,
        name: &str,
        transform: F,
    ) -> StoreResult<K>
    where
        K: HasStatus,
        K::Status: Default + Clone + Serialize,
        F: Fn(K::Status) -> K::Status + Send + Sync,
    {
        let transform = &transform;
        let api = &self.api;
        self.retry_guarded(namespace, name, move |current: K| async move {
            let old = current.status().cloned();
            let new = transform(old.clone().unwrap_or_default());

            let diff = create_merge_patch(
                &json!({ "status": serde_json::to_value(&old)? }),
                &json!({ "status": serde_json::to_value(&new)? }),
            );
            if is_empty_patch(&diff) {
                return Ok(current);
            }

            let mut patch = diff;
            if let Some(map) = patch.as_object_mut() {
                map.insert(
                    "metadata".to_string(),
                    json!({ "resourceVersion": current.resource_version() }),
                );
            }
            api.patch_status(namespace, name, &patch).await
        })
        .await
    }

    /// Shared attempt loop: re-read, run `write`, retry on conflict.
    async fn retry_guarded<W, Fut>(&self, namespace: &str, name: &str, write: W) -> StoreResult<K>
    where
        W: Fn(K) -> Fut,
        Fut: std::future::Future<Output = StoreResult<K>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last: Option<StoreError> = None;

        for attempt in 1..=max_attempts {
            let Some(current) = self.api.get(namespace, name).await? else {
                return Err(StoreError::NotFound {
                    kind: kind_of::<K>(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            };

            match write(current).await {
                Ok(updated) => return Ok(updated),
                Err(err) if err.is_conflict() => {
                    debug!(
                        kind = %kind_of::<K>(),
                        %namespace,
                        %name,
                        attempt,
                        "Write conflicted, retrying"
                    );
                    last = Some(err);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.interval).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let last = last.map(|e| e.to_string()).unwrap_or_default();
        warn!(
            kind = %kind_of::<K>(),
            %namespace,
            %name,
            attempts = max_attempts,
            "Giving up on update"
        );
        Err(StoreError::AttemptsExhausted {
            kind: kind_of::<K>(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            attempts: max_attempts,
            last,
        })
    }

    /// Delete the record; a record that is already gone counts as deleted.
    ///
    /// Returns whether a delete was issued.
    pub async fn delete_if_exists(&self, namespace: &str, name: &str) -> StoreResult<bool> {
        match self.api.delete(namespace, name).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}
