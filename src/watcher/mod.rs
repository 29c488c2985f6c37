//! Cross-cluster Chart status watchers
//!
//! [`Supervisor`] periodically lists Apps, derives the set of clusters they
//! target and keeps exactly one [`ChartStatusWatcher`] task running per
//! cluster. Each task owns a child of the supervisor's cancellation token.

pub mod chart_status;

pub use chart_status::{ChartStatusWatcher, EventOutcome, RECONNECT_DELAY};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::RetryConfig;
use crate::clients::{ClusterClientProvider, ClusterRef};
use crate::crd::App;
use crate::metrics::prometheus::ACTIVE_WATCHERS;
use crate::store::ObjectStore;
use crate::{Error, Result};

use chart_status::sleep_or_cancel;

struct WatcherTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Starts and stops per-cluster status watchers as Apps come and go
pub struct Supervisor {
    apps: Arc<dyn ObjectStore<App>>,
    clients: Arc<dyn ClusterClientProvider>,
    chart_namespace: String,
    watch_namespace: Option<String>,
    discovery_interval: Duration,
    retry: RetryConfig,
    tasks: BTreeMap<ClusterRef, WatcherTask>,
}

impl Supervisor {
    pub fn new(
        apps: Arc<dyn ObjectStore<App>>,
        clients: Arc<dyn ClusterClientProvider>,
        chart_namespace: String,
        discovery_interval: Duration,
    ) -> Result<Self> {
        if chart_namespace.is_empty() {
            return Err(Error::ConfigError("chart namespace must not be empty".to_string()));
        }
        Ok(Self {
            apps,
            clients,
            chart_namespace,
            watch_namespace: None,
            discovery_interval,
            retry: RetryConfig::default(),
            tasks: BTreeMap::new(),
        })
    }

    /// Only consider Apps in `namespace`
    pub fn with_watch_namespace(mut self, namespace: Option<String>) -> Self {
        self.watch_namespace = namespace;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Clusters with a running watcher
    pub fn clusters(&self) -> Vec<ClusterRef> {
        self.tasks.keys().cloned().collect()
    }

    /// Run discovery until `token` is canceled, then stop every watcher
    pub async fn run(mut self, token: CancellationToken) {
        info!(interval_secs = self.discovery_interval.as_secs(), "starting status watcher supervisor");
        loop {
            if let Err(e) = self.sync(&token).await {
                warn!(error = %e, "failed to list Apps for watcher discovery");
            }
            if !sleep_or_cancel(self.discovery_interval, &token).await {
                break;
            }
        }
        self.shutdown().await;
        info!("status watcher supervisor stopped");
    }

    /// One discovery round: start watchers for new clusters and stop those
    /// no App references anymore.
    pub async fn sync(&mut self, token: &CancellationToken) -> Result<()> {
        let apps = self.apps.list(self.watch_namespace.as_deref()).await?;
        let wanted: BTreeSet<ClusterRef> = apps
            .iter()
            .filter_map(|app| match ClusterRef::for_app(app) {
                Ok(cluster) => Some(cluster),
                Err(e) => {
                    debug!(app = %app.name_any(), error = %e, "App has no usable kubeConfig");
                    None
                }
            })
            .collect();

        let stale: Vec<ClusterRef> = self
            .tasks
            .keys()
            .filter(|cluster| !wanted.contains(*cluster))
            .cloned()
            .collect();
        for cluster in stale {
            if let Some(task) = self.tasks.remove(&cluster) {
                info!(%cluster, "stopping status watcher");
                task.token.cancel();
            }
        }

        // Restart watchers whose task ended.
        self.tasks.retain(|_, task| !task.handle.is_finished());

        for cluster in wanted {
            if self.tasks.contains_key(&cluster) {
                continue;
            }
            let watcher = ChartStatusWatcher::new(
                cluster.clone(),
                self.clients.clone(),
                self.apps.clone(),
                self.chart_namespace.clone(),
            )?
            .with_retry(self.retry.clone());
            let child = token.child_token();
            info!(%cluster, "starting status watcher");
            let handle = tokio::spawn(watcher.run(child.clone()));
            self.tasks.insert(cluster, WatcherTask { token: child, handle });
        }

        ACTIVE_WATCHERS.set(self.tasks.len() as f64);
        Ok(())
    }

    async fn shutdown(&mut self) {
        for (cluster, task) in std::mem::take(&mut self.tasks) {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                warn!(%cluster, error = %e, "status watcher task failed");
            }
        }
        ACTIVE_WATCHERS.set(0.0);
    }
}
