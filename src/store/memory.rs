//! Versioned in-memory record store
//!
//! Mirrors the API server behaviors the reconcilers depend on: resource
//! versions bump on every write, version-guarded writes conflict, `status`
//! only changes through `patch_status`, `generation` bumps when `spec`
//! changes, and deleting an object with finalizers only marks it.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use kube::ResourceExt;
use serde_json::{Value, json};

use super::api::{Record, RecordApi, kind_of};
use super::error::{StoreError, StoreResult};
use super::patch::apply_merge_patch;

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<(String, String), Value>,
    version: u64,
    uid: u64,
    /// Pending simulated concurrent writers
    interference: u32,
    /// Merge patch the simulated writers apply, if any
    interference_patch: Option<Value>,
    /// Pending rejected spec/metadata patches
    rejections: u32,
    writes: u64,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

pub struct MemoryRecords<K> {
    state: Mutex<MemoryState>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Record> Default for MemoryRecords<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Record> MemoryRecords<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            _kind: PhantomData,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store an object verbatim, status included, bypassing write rules.
    pub fn insert(&self, obj: &K) -> StoreResult<K> {
        let mut value = serde_json::to_value(obj)?;
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        let mut state = self.lock();
        let version = state.next_version();
        state.uid += 1;
        let uid = format!("uid-{}", state.uid);

        if let Some(meta) = metadata_mut(&mut value) {
            meta.insert("namespace".into(), json!(namespace));
            meta.insert("resourceVersion".into(), json!(version));
            meta.entry("uid").or_insert_with(|| json!(uid));
            meta.entry("generation").or_insert_with(|| json!(1));
        }

        state.objects.insert((namespace, name), value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Snapshot of a stored object.
    pub fn peek(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn names(&self, namespace: &str) -> Vec<String> {
        let state = self.lock();
        state
            .objects
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful mutating calls so far.
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    /// Make the next `count` version-guarded writes lose a race against a
    /// concurrent writer.
    pub fn interfere(&self, count: u32) {
        let mut state = self.lock();
        state.interference = count;
        state.interference_patch = None;
    }

    /// Like [`MemoryRecords::interfere`], with each concurrent writer
    /// applying `patch` to the stored object.
    pub fn interfere_with(&self, count: u32, patch: Value) {
        let mut state = self.lock();
        state.interference = count;
        state.interference_patch = Some(patch);
    }

    /// Make the next `count` spec/metadata merge patches fail outright.
    pub fn reject_patches(&self, count: u32) {
        self.lock().rejections = count;
    }

    fn not_found(namespace: &str, name: &str) -> StoreError {
        StoreError::NotFound {
            kind: kind_of::<K>(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn conflict(namespace: &str, name: &str, message: String) -> StoreError {
        StoreError::Conflict {
            kind: kind_of::<K>(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            message,
        }
    }

    /// Enforce the optimistic-concurrency guard for one write.
    fn guard(
        state: &mut MemoryState,
        namespace: &str,
        name: &str,
        requested: Option<String>,
    ) -> StoreResult<()> {
        let Some(requested) = requested else {
            return Ok(());
        };

        if state.interference > 0 {
            state.interference -= 1;
            let version = state.next_version();
            let patch = state.interference_patch.clone();
            if let Some(stored) = state
                .objects
                .get_mut(&(namespace.to_string(), name.to_string()))
            {
                if let Some(patch) = &patch {
                    apply_merge_patch(stored, patch);
                }
                if let Some(meta) = metadata_mut(stored) {
                    meta.insert("resourceVersion".into(), json!(version));
                }
            }
            return Err(Self::conflict(
                namespace,
                name,
                "the object has been modified by a concurrent writer".to_string(),
            ));
        }

        let stored = state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|v| v.pointer("/metadata/resourceVersion"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        if stored != requested {
            return Err(Self::conflict(
                namespace,
                name,
                format!("resource version {} does not match {}", requested, stored),
            ));
        }
        Ok(())
    }

    /// Stamp a new version, bump generation on spec change, and release
    /// objects whose deletion is no longer blocked by finalizers.
    fn commit(
        state: &mut MemoryState,
        namespace: &str,
        name: &str,
        previous: &Value,
        mut next: Value,
    ) -> StoreResult<K> {
        let version = state.next_version();
        let generation = previous
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let generation = if previous.get("spec") != next.get("spec") {
            generation + 1
        } else {
            generation
        };

        if let Some(meta) = metadata_mut(&mut next) {
            meta.insert("resourceVersion".into(), json!(version));
            meta.insert("generation".into(), json!(generation));
            for key in ["uid", "creationTimestamp", "namespace", "name"] {
                match previous.pointer(&format!("/metadata/{}", key)) {
                    Some(v) => meta.insert(key.into(), v.clone()),
                    None => meta.remove(key),
                };
            }
            if let Some(ts) = previous.pointer("/metadata/deletionTimestamp") {
                meta.insert("deletionTimestamp".into(), ts.clone());
            }
        }

        state.writes += 1;
        let key = (namespace.to_string(), name.to_string());
        let released = next.pointer("/metadata/deletionTimestamp").is_some()
            && finalizers_empty(&next);
        if released {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, next.clone());
        }
        Ok(serde_json::from_value(next)?)
    }

    fn create_now(&self, namespace: &str, obj: &K) -> StoreResult<K> {
        let name = obj.name_any();
        let mut value = serde_json::to_value(obj)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("status");
        }

        let mut state = self.lock();
        let key = (namespace.to_string(), name.clone());
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind_of::<K>(),
                namespace: namespace.to_string(),
                name,
            });
        }

        let version = state.next_version();
        state.uid += 1;
        let uid = format!("uid-{}", state.uid);
        if let Some(meta) = metadata_mut(&mut value) {
            meta.insert("namespace".into(), json!(namespace));
            meta.insert("resourceVersion".into(), json!(version));
            meta.insert("uid".into(), json!(uid));
            meta.insert("generation".into(), json!(1));
            meta.insert("creationTimestamp".into(), json!(now()));
            meta.remove("deletionTimestamp");
        }

        state.writes += 1;
        state.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    fn replace_now(&self, namespace: &str, obj: &K) -> StoreResult<K> {
        let name = obj.name_any();
        let mut next = serde_json::to_value(obj)?;

        let mut state = self.lock();
        let previous = state
            .objects
            .get(&(namespace.to_string(), name.clone()))
            .cloned()
            .ok_or_else(|| Self::not_found(namespace, &name))?;
        Self::guard(&mut state, namespace, &name, obj.resource_version())?;

        if let Some(map) = next.as_object_mut() {
            match previous.get("status") {
                Some(status) => map.insert("status".into(), status.clone()),
                None => map.remove("status"),
            };
        }
        Self::commit(&mut state, namespace, &name, &previous, next)
    }

    fn patch_now(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        status_only: bool,
    ) -> StoreResult<K> {
        let mut state = self.lock();
        let previous = state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found(namespace, name))?;

        if !status_only && state.rejections > 0 {
            state.rejections -= 1;
            return Err(Self::conflict(namespace, name, "patch rejected".to_string()));
        }

        let requested = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self::guard(&mut state, namespace, name, requested)?;

        let mut effective = patch.clone();
        if status_only {
            effective = match patch.get("status") {
                Some(status) => json!({ "status": status }),
                None => json!({}),
            };
        } else if let Some(map) = effective.as_object_mut() {
            map.remove("status");
        }

        let mut next = previous.clone();
        apply_merge_patch(&mut next, &effective);
        Self::commit(&mut state, namespace, name, &previous, next)
    }

    fn delete_now(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let mut state = self.lock();
        let key = (namespace.to_string(), name.to_string());
        let Some(mut stored) = state.objects.get(&key).cloned() else {
            return Err(Self::not_found(namespace, name));
        };

        state.writes += 1;
        if finalizers_empty(&stored) {
            state.objects.remove(&key);
            return Ok(());
        }

        let version = state.next_version();
        if let Some(meta) = metadata_mut(&mut stored) {
            meta.entry("deletionTimestamp").or_insert_with(|| json!(now()));
            meta.insert("resourceVersion".into(), json!(version));
        }
        state.objects.insert(key, stored);
        Ok(())
    }

    fn list_now(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<K>> {
        let state = self.lock();
        let mut out = Vec::new();
        for ((ns, _), value) in state.objects.iter() {
            if ns != namespace {
                continue;
            }
            let labels = value.pointer("/metadata/labels");
            let matches = selector.iter().all(|(k, v)| {
                labels
                    .and_then(|l| l.get(k))
                    .and_then(Value::as_str)
                    .is_some_and(|actual| actual == v)
            });
            if matches {
                out.push(serde_json::from_value(value.clone())?);
            }
        }
        Ok(out)
    }
}

impl<K: Record> RecordApi<K> for MemoryRecords<K> {
    fn get<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<K>>> {
        async move {
            let state = self.lock();
            match state.objects.get(&(namespace.to_string(), name.to_string())) {
                Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
                None => Ok(None),
            }
        }
        .boxed()
    }

    fn create<'a>(&'a self, namespace: &'a str, obj: &'a K) -> BoxFuture<'a, StoreResult<K>> {
        async move { self.create_now(namespace, obj) }.boxed()
    }

    fn replace<'a>(&'a self, namespace: &'a str, obj: &'a K) -> BoxFuture<'a, StoreResult<K>> {
        async move { self.replace_now(namespace, obj) }.boxed()
    }

    fn patch_merge<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        patch: &'a Value,
    ) -> BoxFuture<'a, StoreResult<K>> {
        async move { self.patch_now(namespace, name, patch, false) }.boxed()
    }

    fn patch_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        patch: &'a Value,
    ) -> BoxFuture<'a, StoreResult<K>> {
        async move { self.patch_now(namespace, name, patch, true) }.boxed()
    }

    fn delete<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        async move { self.delete_now(namespace, name) }.boxed()
    }

    fn list<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a BTreeMap<String, String>,
    ) -> BoxFuture<'a, StoreResult<Vec<K>>> {
        async move { self.list_now(namespace, selector) }.boxed()
    }
}

fn metadata_mut(value: &mut Value) -> Option<&mut serde_json::Map<String, Value>> {
    value
        .as_object_mut()?
        .entry("metadata")
        .or_insert_with(|| json!({}))
        .as_object_mut()
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn finalizers_empty(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_none_or(|f| f.is_empty())
}
