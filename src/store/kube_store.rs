//! [`ObjectStore`] backed by the Kubernetes API

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use super::{status_value, ObjectStore};
use crate::{Error, Result};

/// Kubernetes API access for one namespaced resource kind
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }
}

fn identity<K: Resource>(obj: &K) -> Result<(String, String)> {
    let namespace = obj.meta().namespace.clone().ok_or_else(|| {
        Error::ValidationError("object is missing metadata.namespace".to_string())
    })?;
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::ValidationError("object is missing metadata.name".to_string()))?;
    Ok((namespace, name))
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, &Self::kind(), namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        let api: Api<K> = match namespace {
            Some(ns) => self.api(ns),
            None => Api::all(self.client.clone()),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube(e, &Self::kind(), namespace.unwrap_or_default(), ""))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj)?;
        trace!(kind = %Self::kind(), %namespace, %name, "creating object");
        self.api(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &Self::kind(), &namespace, &name))
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj)?;
        trace!(kind = %Self::kind(), %namespace, %name, rv = ?obj.resource_version(), "replacing object");
        self.api(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &Self::kind(), &namespace, &name))
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj)?;
        let resource_version = obj.resource_version().ok_or_else(|| {
            Error::ValidationError(format!(
                "{} {}/{} has no resourceVersion for a guarded status write",
                Self::kind(),
                namespace,
                name
            ))
        })?;
        // A merge patch carrying metadata.resourceVersion is rejected with 409 when stale.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status_value(obj)?,
        });
        self.api(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, &Self::kind(), &namespace, &name))
    }

    async fn merge_status(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj)?;
        let patch = serde_json::json!({ "status": status_value(obj)? });
        self.api(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, &Self::kind(), &namespace, &name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube(e, &Self::kind(), namespace, name))
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
