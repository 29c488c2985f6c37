//! Narrow object store interface used by pipeline steps and the status watcher
//!
//! Every read and write the operator makes against a cluster goes through
//! [`ObjectStore`]. The production implementation is [`KubeStore`]; tests use
//! [`MemoryStore`].

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::{MemoryStore, WriteOp, WriteRecord};

use async_trait::async_trait;

use crate::Result;

/// Namespaced object access with optimistic concurrency
///
/// `replace` and `replace_status` carry the object's resource version and fail
/// with [`crate::Error::Conflict`] when it is stale. `merge_status` does not.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List objects in a namespace, or across all namespaces when `None`
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>>;

    /// Create an object
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace an object's metadata and spec, guarded by its resource version
    async fn replace(&self, obj: &K) -> Result<K>;

    /// Replace an object's status, guarded by its resource version
    async fn replace_status(&self, obj: &K) -> Result<K>;

    /// Overwrite an object's status regardless of its resource version
    async fn merge_status(&self, obj: &K) -> Result<K>;

    /// Delete an object. Returns false when it was already gone.
    async fn delete(&self, namespace: &str, name: &str) -> Result<bool>;
}

/// Take the `status` member out of an object's JSON form
pub(crate) fn status_value<K: serde::Serialize>(obj: &K) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(obj)?;
    Ok(value
        .get_mut("status")
        .map(serde_json::Value::take)
        .unwrap_or(serde_json::Value::Null))
}
