//! Test doubles shared by the integration suites

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use app_operator::clients::{ChartEvents, ClusterClient, ClusterClientProvider, ClusterRef, ProbeError};
use app_operator::crd::{
    App, AppConfig, AppKubeConfig, AppSpec, Catalog, CatalogRepository, CatalogSpec, Chart,
    ChartSpec, ChartStatus, ChartStatusRelease, NamespacedRef, CHART_APP_NAMESPACE_ANNOTATION,
    CHART_APP_NAME_ANNOTATION,
};
use app_operator::store::{MemoryStore, ObjectStore};
use app_operator::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ObjectMeta, WatchEvent};
use tokio_util::sync::CancellationToken;

pub const CHART_NAMESPACE: &str = "giantswarm";
pub const APP_NAMESPACE: &str = "org-acme";

// ============================================================================
// Fixtures
// ============================================================================

pub fn kubeconfig_secret() -> NamespacedRef {
    NamespacedRef::new(APP_NAMESPACE, "abc12-kubeconfig")
}

pub fn app(name: &str) -> App {
    App {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(APP_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: AppSpec {
            name: format!("{}-app", name),
            namespace: "hello".to_string(),
            version: "1.2.3".to_string(),
            catalog: "giantswarm".to_string(),
            catalog_namespace: None,
            kube_config: AppKubeConfig {
                in_cluster: false,
                secret: Some(kubeconfig_secret()),
                context: None,
            },
            config: None,
            user_config: Some(AppConfig {
                config_map: Some(NamespacedRef::new(APP_NAMESPACE, format!("{}-user-values", name))),
            }),
        },
        status: None,
    }
}

pub fn catalog(storage: CatalogRepository, repositories: Vec<CatalogRepository>) -> Catalog {
    Catalog {
        metadata: ObjectMeta {
            name: Some("giantswarm".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("4b1d5c0e-0000-4000-8000-000000000001".to_string()),
            ..Default::default()
        },
        spec: CatalogSpec {
            title: "Giant Swarm".to_string(),
            description: String::new(),
            storage,
            repositories,
            config: None,
        },
        status: None,
    }
}

pub fn values_config_map(namespace: &str, name: &str, values: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("values".to_string(), values.to_string())])),
        ..Default::default()
    }
}

/// A Chart as chart-operator would report it for `app`
pub fn chart_for(app_name: &str, release_status: &str, version: &str) -> Chart {
    Chart {
        metadata: ObjectMeta {
            name: Some(app_name.to_string()),
            namespace: Some(CHART_NAMESPACE.to_string()),
            annotations: Some(BTreeMap::from([
                (CHART_APP_NAMESPACE_ANNOTATION.to_string(), APP_NAMESPACE.to_string()),
                (CHART_APP_NAME_ANNOTATION.to_string(), app_name.to_string()),
            ])),
            ..Default::default()
        },
        spec: ChartSpec::default(),
        status: Some(ChartStatus {
            app_version: "0.4.0".to_string(),
            version: version.to_string(),
            reason: String::new(),
            release: ChartStatusRelease {
                status: release_status.to_string(),
                reason: String::new(),
                last_deployed: None,
            },
        }),
    }
}

// ============================================================================
// Fake cluster
// ============================================================================

/// Workload cluster with scripted probes and watches
#[derive(Default)]
pub struct FakeCluster {
    pub charts: Arc<MemoryStore<Chart>>,
    pub config_maps: Arc<MemoryStore<ConfigMap>>,
    probe_failures: Mutex<VecDeque<ProbeError>>,
    watches: Mutex<VecDeque<Vec<WatchEvent<Chart>>>>,
    on_exhausted: Mutex<Option<CancellationToken>>,
    pub probes: AtomicU32,
    pub watch_opens: AtomicU32,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next probes with these errors, in order
    pub fn fail_probes(&self, failures: Vec<ProbeError>) {
        self.probe_failures.lock().unwrap().extend(failures);
    }

    /// Each opened watch replays the next script and then closes
    pub fn script_watch(&self, events: Vec<WatchEvent<Chart>>) {
        self.watches.lock().unwrap().push_back(events);
    }

    /// Cancel `token` when a watch is opened after the scripts ran out
    pub fn cancel_when_exhausted(&self, token: CancellationToken) {
        *self.on_exhausted.lock().unwrap() = Some(token);
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    fn charts(&self) -> Arc<dyn ObjectStore<Chart>> {
        self.charts.clone()
    }

    fn config_maps(&self) -> Arc<dyn ObjectStore<ConfigMap>> {
        self.config_maps.clone()
    }

    async fn probe_charts(&self, _namespace: &str) -> std::result::Result<(), ProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.probe_failures.lock().unwrap().pop_front() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn watch_charts(&self, _namespace: &str) -> Result<ChartEvents> {
        self.watch_opens.fetch_add(1, Ordering::SeqCst);
        let script = self.watches.lock().unwrap().pop_front();
        match script {
            Some(events) => Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed()),
            None => {
                if let Some(token) = self.on_exhausted.lock().unwrap().as_ref() {
                    token.cancel();
                }
                Ok(futures::stream::empty().boxed())
            }
        }
    }
}

/// Provider handing out one [`FakeCluster`] for every cluster reference
pub struct FakeProvider {
    pub cluster: Arc<FakeCluster>,
    missing_credentials: AtomicU32,
    invalid_credentials: AtomicU32,
    pub resolves: AtomicU32,
}

impl FakeProvider {
    pub fn new(cluster: Arc<FakeCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            missing_credentials: AtomicU32::new(0),
            invalid_credentials: AtomicU32::new(0),
            resolves: AtomicU32::new(0),
        })
    }

    /// Report the kubeconfig secret as missing for the next `n` lookups
    pub fn missing_credentials(&self, n: u32) {
        self.missing_credentials.store(n, Ordering::SeqCst);
    }

    /// Report the kubeconfig secret as unusable for the next `n` lookups
    pub fn invalid_credentials(&self, n: u32) {
        self.invalid_credentials.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterClientProvider for FakeProvider {
    async fn client_for(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterClient>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let missing = self
            .missing_credentials
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let invalid = self
            .invalid_credentials
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if invalid {
            return Err(Error::SecretError("secret has no kubeConfig key".to_string()));
        }
        if missing {
            let secret = match cluster {
                ClusterRef::Kubeconfig { secret, .. } => secret.clone(),
                ClusterRef::InCluster => NamespacedRef::default(),
            };
            return Err(Error::CredentialsMissing {
                namespace: secret.namespace,
                name: secret.name,
            });
        }
        Ok(self.cluster.clone())
    }
}
