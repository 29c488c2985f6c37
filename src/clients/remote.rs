//! kube-rs backed cluster clients

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ListParams, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::debug;

use super::{ChartEvents, ClientBuilder, ClusterClient, ProbeError};
use crate::adapters::secrets;
use crate::crd::{Chart, NamespacedRef};
use crate::store::{KubeStore, ObjectStore};
use crate::{Error, Result};

/// Upper bound for a single availability probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side timeout for one watch request
const WATCH_TIMEOUT_SECS: u32 = 290;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle-read timeout; it also applies to watch bodies, so it must outlast
/// a quiet watch.
const READ_TIMEOUT: Duration = Duration::from_secs(WATCH_TIMEOUT_SECS as u64 + 5);

/// [`ClusterClient`] over a kube [`Client`]
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    charts: Arc<KubeStore<Chart>>,
    config_maps: Arc<KubeStore<ConfigMap>>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            charts: Arc::new(KubeStore::new(client.clone())),
            config_maps: Arc::new(KubeStore::new(client.clone())),
            client,
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    fn charts(&self) -> Arc<dyn ObjectStore<Chart>> {
        self.charts.clone()
    }

    fn config_maps(&self) -> Arc<dyn ObjectStore<ConfigMap>> {
        self.config_maps.clone()
    }

    async fn probe_charts(&self, namespace: &str) -> std::result::Result<(), ProbeError> {
        let api: Api<Chart> = Api::namespaced(self.client.clone(), namespace);
        match tokio::time::timeout(PROBE_TIMEOUT, api.list(&ListParams::default().limit(1))).await {
            Err(_) => Err(ProbeError::Unreachable(format!(
                "no response within {}s",
                PROBE_TIMEOUT.as_secs()
            ))),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(kube::Error::Api(resp))) if resp.code == 404 => {
                Err(ProbeError::KindNotInstalled(resp.message))
            }
            Ok(Err(e @ (kube::Error::HyperError(_) | kube::Error::Service(_)))) => {
                Err(ProbeError::Unreachable(e.to_string()))
            }
            Ok(Err(e)) => Err(ProbeError::Other(Error::from_kube(e, "Chart", namespace, ""))),
        }
    }

    async fn watch_charts(&self, namespace: &str) -> Result<ChartEvents> {
        let api: Api<Chart> = Api::namespaced(self.client.clone(), namespace);
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        // Resource version "0" replays current objects as ADDED before live events.
        let stream = api
            .watch(&params, "0")
            .await
            .map_err(|e| Error::from_kube(e, "Chart", namespace, ""))?;
        debug!(%namespace, "opened Chart watch");
        Ok(stream
            .map(|event| event.map_err(|e| Error::WatchError(e.to_string())))
            .boxed())
    }
}

/// Builds clients from kubeconfig secrets in the management cluster
pub struct KubeconfigClientBuilder {
    management: Client,
}

impl KubeconfigClientBuilder {
    pub fn new(management: Client) -> Self {
        Self { management }
    }
}

#[async_trait]
impl ClientBuilder for KubeconfigClientBuilder {
    async fn build(
        &self,
        secret_ref: &NamespacedRef,
        context: Option<&str>,
    ) -> Result<Arc<dyn ClusterClient>> {
        let secret = secrets::get_secret(&self.management, &secret_ref.namespace, &secret_ref.name)
            .await?
            .ok_or_else(|| Error::CredentialsMissing {
                namespace: secret_ref.namespace.clone(),
                name: secret_ref.name.clone(),
            })?;

        let raw = secrets::get_kubeconfig(&secret)?;
        let kubeconfig = Kubeconfig::from_yaml(&raw).map_err(|e| {
            Error::SecretError(format!("invalid kubeconfig in secret {}: {}", secret_ref, e))
        })?;
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| {
                Error::ConfigError(format!("failed to load kubeconfig {}: {}", secret_ref, e))
            })?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        let client = Client::try_from(config)?;
        Ok(Arc::new(KubeClusterClient::new(client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_watch_ends_before_read_timeout() {
        assert!(READ_TIMEOUT > Duration::from_secs(u64::from(WATCH_TIMEOUT_SECS)));
        assert!(PROBE_TIMEOUT < READ_TIMEOUT);
    }
}
