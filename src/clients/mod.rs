//! Access to the clusters Apps are installed into
//!
//! [`ClusterClientProvider`] answers "give me a client for cluster X". The
//! production provider, [`RemoteClients`], memoizes one client per kubeconfig
//! secret in a [`ClientCache`].

mod cache;
mod remote;

pub use cache::{ClientBuilder, ClientCache, RemoteClients, DEFAULT_CLIENT_TTL};
pub use remote::{KubeClusterClient, KubeconfigClientBuilder, PROBE_TIMEOUT};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::WatchEvent;

use crate::crd::{App, Chart, NamespacedRef};
use crate::store::ObjectStore;
use crate::{Error, Result};

/// Which cluster an App targets
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterRef {
    /// The cluster this operator runs in
    InCluster,
    /// A cluster reached through a kubeconfig stored in a Secret
    Kubeconfig {
        secret: NamespacedRef,
        context: Option<String>,
    },
}

impl ClusterRef {
    /// Resolve the target cluster from an App's `kubeConfig` section
    pub fn for_app(app: &App) -> Result<Self> {
        let kube_config = &app.spec.kube_config;
        if kube_config.in_cluster {
            return Ok(ClusterRef::InCluster);
        }
        match &kube_config.secret {
            Some(secret) if !secret.name.is_empty() && !secret.namespace.is_empty() => {
                Ok(ClusterRef::Kubeconfig {
                    secret: secret.clone(),
                    context: kube_config.context.as_ref().map(|c| c.name.clone()),
                })
            }
            _ => Err(Error::ValidationError(
                "kubeConfig.secret name and namespace are required unless kubeConfig.inCluster is true"
                    .to_string(),
            )),
        }
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRef::InCluster => write!(f, "in-cluster"),
            ClusterRef::Kubeconfig { secret, .. } => write!(f, "kubeconfig {}", secret),
        }
    }
}

/// Why a cluster did not answer a probe
#[derive(Debug)]
pub enum ProbeError {
    /// The API server could not be reached
    Unreachable(String),
    /// The API server answered but does not serve Charts
    KindNotInstalled(String),
    Other(Error),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Unreachable(msg) => write!(f, "API unreachable: {}", msg),
            ProbeError::KindNotInstalled(msg) => write!(f, "Chart kind not installed: {}", msg),
            ProbeError::Other(e) => write!(f, "{}", e),
        }
    }
}

/// Stream of raw watch events from a cluster
pub type ChartEvents = BoxStream<'static, Result<WatchEvent<Chart>>>;

/// The operations this operator needs from a workload cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    fn charts(&self) -> Arc<dyn ObjectStore<Chart>>;

    fn config_maps(&self) -> Arc<dyn ObjectStore<ConfigMap>>;

    /// Bounded check that the Chart collection in `namespace` can be listed
    async fn probe_charts(&self, namespace: &str) -> std::result::Result<(), ProbeError>;

    /// Open a watch on all Charts in `namespace`; the stream ends when the
    /// server closes it.
    async fn watch_charts(&self, namespace: &str) -> Result<ChartEvents>;
}

/// Resolves clients for clusters
#[async_trait]
pub trait ClusterClientProvider: Send + Sync {
    /// Fails with [`Error::CredentialsMissing`] while the kubeconfig secret
    /// does not exist.
    async fn client_for(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AppKubeConfig, AppSpec, KubeConfigContext};

    fn app(kube_config: AppKubeConfig) -> App {
        App::new(
            "hello",
            AppSpec {
                kube_config,
                ..Default::default()
            },
        )
    }

    #[test]
    fn in_cluster_wins_over_secret() {
        let app = app(AppKubeConfig {
            in_cluster: true,
            secret: Some(NamespacedRef::new("org-acme", "abc12-kubeconfig")),
            context: None,
        });
        assert_eq!(ClusterRef::for_app(&app).unwrap(), ClusterRef::InCluster);
    }

    #[test]
    fn secret_reference_carries_context() {
        let app = app(AppKubeConfig {
            in_cluster: false,
            secret: Some(NamespacedRef::new("org-acme", "abc12-kubeconfig")),
            context: Some(KubeConfigContext {
                name: "abc12-admin@abc12".to_string(),
            }),
        });
        assert_eq!(
            ClusterRef::for_app(&app).unwrap(),
            ClusterRef::Kubeconfig {
                secret: NamespacedRef::new("org-acme", "abc12-kubeconfig"),
                context: Some("abc12-admin@abc12".to_string()),
            }
        );
    }

    #[test]
    fn missing_secret_is_a_validation_error() {
        let err = ClusterRef::for_app(&app(AppKubeConfig::default())).unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }
}
