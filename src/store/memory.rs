//! In-memory [`ObjectStore`] with API-server-like versioning and finalizer rules
//!
//! Used by the test suites. Every successful write bumps the object's
//! resource version and is recorded so tests can assert on write counts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{status_value, ObjectStore};
use crate::{Error, Result};

/// Kind of write recorded by [`MemoryStore`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Replace,
    ReplaceStatus,
    MergeStatus,
    Delete,
}

/// One recorded write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub op: WriteOp,
    pub namespace: String,
    pub name: String,
}

type Key = (String, String);

pub struct MemoryStore<K> {
    kind: String,
    objects: Mutex<BTreeMap<Key, K>>,
    writes: Mutex<Vec<WriteRecord>>,
    next_version: AtomicU64,
    pending_conflicts: AtomicU32,
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync,
    K::DynamicType: Default,
{
    pub fn new() -> Self {
        Self {
            kind: K::kind(&K::DynamicType::default()).to_string(),
            objects: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            next_version: AtomicU64::new(1),
            pending_conflicts: AtomicU32::new(0),
        }
    }

    /// Seed an object without recording a write. Returns the stored copy.
    pub fn insert(&self, mut obj: K) -> K {
        obj.meta_mut().resource_version = Some(self.bump());
        let key = (obj.namespace().unwrap_or_default(), obj.name_any());
        self.objects().insert(key, obj.clone());
        obj
    }

    /// Current copy of an object
    pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of all objects in a namespace, sorted
    pub fn names(&self, namespace: &str) -> Vec<String> {
        self.objects()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// All writes since creation or the last [`MemoryStore::clear_writes`]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded writes of one kind
    pub fn count(&self, op: WriteOp) -> usize {
        self.writes().iter().filter(|w| w.op == op).count()
    }

    pub fn clear_writes(&self) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Make the next `n` guarded writes fail with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<Key, K>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn record(&self, op: WriteOp, namespace: &str, name: &str) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WriteRecord {
                op,
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
    }

    fn not_found(&self, namespace: &str, name: &str) -> Error {
        Error::NotFound {
            kind: self.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn conflict(&self, namespace: &str, name: &str, message: &str) -> Error {
        Error::Conflict {
            kind: self.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    /// Check the caller's resource version against the stored one
    fn guard(&self, stored: &K, incoming: &K, namespace: &str, name: &str) -> Result<()> {
        let injected = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(self.conflict(namespace, name, "injected conflict"));
        }
        match incoming.resource_version() {
            Some(rv) if Some(&rv) != stored.resource_version().as_ref() => Err(self.conflict(
                namespace,
                name,
                "the object has been modified; please apply your changes to the latest version",
            )),
            _ => Ok(()),
        }
    }

    fn with_status(&self, target: &K, source: &K) -> Result<K> {
        let mut value = serde_json::to_value(target)?;
        let status = status_value(source)?;
        if let Some(map) = value.as_object_mut() {
            if status.is_null() {
                map.remove("status");
            } else {
                map.insert("status".to_string(), status);
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    fn write_status(&self, obj: &K, guarded: bool, op: WriteOp) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let mut objects = self.objects();
        let key = (namespace.clone(), name.clone());
        let stored = objects
            .get(&key)
            .ok_or_else(|| self.not_found(&namespace, &name))?;
        if guarded {
            self.guard(stored, obj, &namespace, &name)?;
        }
        let mut value = serde_json::to_value(stored)?;
        merge_patch(&mut value, &serde_json::json!({ "status": status_value(obj)? }));
        let mut updated: K = serde_json::from_value(value)?;
        updated.meta_mut().resource_version = Some(self.bump());
        objects.insert(key, updated.clone());
        drop(objects);
        self.record(op, &namespace, &name);
        Ok(updated)
    }
}

/// JSON merge patch (RFC 7386) as the API server applies it to status
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

impl<K> Default for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync,
    K::DynamicType: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync,
    K::DynamicType: Default,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.object(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        Ok(self
            .objects()
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |wanted| wanted == ns))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let key = (namespace.clone(), name.clone());
        let mut objects = self.objects();
        if objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: self.kind.clone(),
                namespace,
                name,
            });
        }
        let mut created = obj.clone();
        created.meta_mut().resource_version = Some(self.bump());
        objects.insert(key, created.clone());
        drop(objects);
        self.record(WriteOp::Create, &namespace, &name);
        Ok(created)
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let key = (namespace.clone(), name.clone());
        let mut objects = self.objects();
        let stored = objects
            .get(&key)
            .ok_or_else(|| self.not_found(&namespace, &name))?;
        self.guard(stored, obj, &namespace, &name)?;

        // Spec writes never touch status; deletion state is owned by the server.
        let mut updated = self.with_status(obj, stored)?;
        updated.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
        updated.meta_mut().resource_version = Some(self.bump());

        if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, updated.clone());
        }
        drop(objects);
        self.record(WriteOp::Replace, &namespace, &name);
        Ok(updated)
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        self.write_status(obj, true, WriteOp::ReplaceStatus)
    }

    async fn merge_status(&self, obj: &K) -> Result<K> {
        self.write_status(obj, false, WriteOp::MergeStatus)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.objects();
        let Some(stored) = objects.get_mut(&key) else {
            return Ok(false);
        };
        if stored.finalizers().is_empty() {
            objects.remove(&key);
        } else if stored.meta().deletion_timestamp.is_none() {
            stored.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
            stored.meta_mut().resource_version = Some(self.bump());
        }
        drop(objects);
        self.record(WriteOp::Delete, namespace, name);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let first = store.insert(config_map("values"));

        let mut newer = first.clone();
        newer.data = Some([("a".to_string(), "1".to_string())].into());
        store.replace(&newer).await.unwrap();

        let err = store.replace(&first).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.count(WriteOp::Replace), 1);
    }

    #[tokio::test]
    async fn delete_with_finalizer_marks_then_replace_removes() {
        let store = MemoryStore::new();
        let mut cm = config_map("guarded");
        cm.metadata.finalizers = Some(vec!["example.com/finalizer".to_string()]);
        store.insert(cm);

        assert!(store.delete("default", "guarded").await.unwrap());
        let mut marked = store.object("default", "guarded").unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        marked.metadata.finalizers = Some(vec![]);
        store.replace(&marked).await.unwrap();
        assert!(store.object("default", "guarded").is_none());
        assert!(!store.delete("default", "guarded").await.unwrap());
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = MemoryStore::new();
        let cm = store.insert(config_map("values"));
        store.inject_conflicts(1);

        assert!(store.replace(&cm).await.unwrap_err().is_conflict());
        assert!(store.replace(&cm).await.is_ok());
    }

    #[test]
    fn merge_patch_removes_nulls_and_keeps_untouched_keys() {
        let mut target = serde_json::json!({
            "status": { "release": { "status": "DEPLOYED", "lastDeployed": "2024-01-01T00:00:00Z" }, "version": "1.0.0" }
        });
        merge_patch(
            &mut target,
            &serde_json::json!({ "status": { "release": { "status": "FAILED", "lastDeployed": null } } }),
        );
        assert_eq!(
            target,
            serde_json::json!({ "status": { "release": { "status": "FAILED" }, "version": "1.0.0" } })
        );
    }
}
