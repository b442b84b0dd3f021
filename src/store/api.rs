//! The narrow record API the store is written against, and its kube backend

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::error::{StoreError, StoreResult};

/// Bounds every stored record type satisfies.
pub trait Record:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Default
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<T> Record for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Default
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// Kind name of a record type, for messages.
pub fn kind_of<K: Record>() -> String {
    K::kind(&()).to_string()
}

/// Namespace-qualified CRUD over versioned records.
///
/// Writes that carry a resource version (`replace`, and patches whose
/// `metadata.resourceVersion` is set) fail with `StoreError::Conflict` when
/// the stored version differs.
pub trait RecordApi<K>: Send + Sync {
    /// Fetch a record; `Ok(None)` when it does not exist.
    fn get<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<K>>>;

    fn create<'a>(&'a self, namespace: &'a str, obj: &'a K) -> BoxFuture<'a, StoreResult<K>>;

    /// Full update guarded by the object's resource version. Status is ignored.
    fn replace<'a>(&'a self, namespace: &'a str, obj: &'a K) -> BoxFuture<'a, StoreResult<K>>;

    /// Merge patch of everything but status.
    fn patch_merge<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        patch: &'a Value,
    ) -> BoxFuture<'a, StoreResult<K>>;

    /// Merge patch of the status subresource.
    fn patch_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        patch: &'a Value,
    ) -> BoxFuture<'a, StoreResult<K>>;

    fn delete<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    /// Records whose labels contain every entry of `selector`.
    fn list<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a BTreeMap<String, String>,
    ) -> BoxFuture<'a, StoreResult<Vec<K>>>;
}

/// Render an equality label selector.
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Records served by the Kubernetes API server.
pub struct KubeRecords<K> {
    client: Client,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Record> KubeRecords<K> {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..PostParams::default()
        }
    }
}

impl<K: Record> RecordApi<K> for KubeRecords<K> {
    fn get<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<K>>> {
        async move {
            self.api(namespace)
                .get_opt(name)
                .await
                .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, name, e))
        }
        .boxed()
    }

    fn create<'a>(&'a self, namespace: &'a str, obj: &'a K) -> BoxFuture<'a, StoreResult<K>> {
        async move {
            let name = obj.name_any();
            debug!(kind = %kind_of::<K>(), %namespace, %name, "Creating record");
            self.api(namespace)
                .create(&self.post_params(), obj)
                .await
                .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, &name, e))
        }
        .boxed()
    }

    fn replace<'a>(&'a self, namespace: &'a str, obj: &'a K) -> BoxFuture<'a, StoreResult<K>> {
        async move {
            let name = obj.name_any();
            self.api(namespace)
                .replace(&name, &self.post_params(), obj)
                .await
                .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, &name, e))
        }
        .boxed()
    }

    fn patch_merge<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        patch: &'a Value,
    ) -> BoxFuture<'a, StoreResult<K>> {
        async move {
            self.api(namespace)
                .patch(name, &self.patch_params(), &Patch::Merge(patch))
                .await
                .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, name, e))
        }
        .boxed()
    }

    fn patch_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        patch: &'a Value,
    ) -> BoxFuture<'a, StoreResult<K>> {
        async move {
            self.api(namespace)
                .patch_status(name, &self.patch_params(), &Patch::Merge(patch))
                .await
                .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, name, e))
        }
        .boxed()
    }

    fn delete<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.api(namespace)
                .delete(name, &DeleteParams::background())
                .await
                .map(|_| ())
                .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, name, e))
        }
        .boxed()
    }

    fn list<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a BTreeMap<String, String>,
    ) -> BoxFuture<'a, StoreResult<Vec<K>>> {
        async move {
            let params = ListParams::default().labels(&label_selector(selector));
            self.api(namespace)
                .list(&params)
                .await
                .map(|list| list.items)
                .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, "", e))
        }
        .boxed()
    }
}
