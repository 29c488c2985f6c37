//! Per-cluster Chart status watcher
//!
//! Loops `resolve client -> wait until the Chart API answers -> watch` until
//! its token is canceled. Every failure and every closed watch start a new
//! cycle after a delay; nothing a cluster does ends the loop.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::WatchEvent;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::adapters::status::StatusMirror;
use crate::backoff::{Backoff, RetryConfig};
use crate::clients::{ClusterClient, ClusterClientProvider, ClusterRef, ProbeError};
use crate::crd::{App, Chart, CHART_APP_NAMESPACE_ANNOTATION, CHART_APP_NAME_ANNOTATION};
use crate::metrics::prometheus::{STATUS_MIRROR_WRITES, WATCH_RECONNECTS};
use crate::store::ObjectStore;
use crate::{Error, Result};

/// Pause between a watch closing and the next cycle
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// What happened to a single watch event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// The App status was written
    Mirrored,
    /// The App status already matched
    Unchanged,
    /// The event carried nothing to mirror or the write was dropped
    Skipped,
}

/// Mirrors Chart status from one cluster onto the owning Apps
pub struct ChartStatusWatcher {
    cluster: ClusterRef,
    clients: Arc<dyn ClusterClientProvider>,
    apps: Arc<dyn ObjectStore<App>>,
    chart_namespace: String,
    retry: RetryConfig,
    reconnect_delay: Duration,
}

impl ChartStatusWatcher {
    pub fn new(
        cluster: ClusterRef,
        clients: Arc<dyn ClusterClientProvider>,
        apps: Arc<dyn ObjectStore<App>>,
        chart_namespace: String,
    ) -> Result<Self> {
        if chart_namespace.is_empty() {
            return Err(Error::ConfigError("chart namespace must not be empty".to_string()));
        }
        Ok(Self {
            cluster,
            clients,
            apps,
            chart_namespace,
            retry: RetryConfig::default(),
            reconnect_delay: RECONNECT_DELAY,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Run until `token` is canceled
    pub async fn run(self, token: CancellationToken) {
        let cluster = self.cluster.to_string();
        let mut backoff = Backoff::new(self.retry.clone());
        info!(%cluster, namespace = %self.chart_namespace, "starting Chart status watcher");

        while !token.is_cancelled() {
            let Some(client) = self.resolve(&cluster).await else {
                if !sleep_or_cancel(backoff.next_delay(), &token).await {
                    break;
                }
                continue;
            };

            if let Err(e) = client.probe_charts(&self.chart_namespace).await {
                match &e {
                    ProbeError::Unreachable(_) => debug!(%cluster, error = %e, "cluster not reachable"),
                    ProbeError::KindNotInstalled(_) => info!(%cluster, error = %e, "waiting for Chart CRD"),
                    ProbeError::Other(_) => error!(%cluster, error = %e, "cluster probe failed"),
                }
                if !sleep_or_cancel(backoff.next_delay(), &token).await {
                    break;
                }
                continue;
            }

            let mut events = match client.watch_charts(&self.chart_namespace).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(%cluster, error = %e, "failed to open Chart watch");
                    if !sleep_or_cancel(backoff.next_delay(), &token).await {
                        break;
                    }
                    continue;
                }
            };
            backoff.reset();
            debug!(%cluster, "watching Charts");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(%cluster, "Chart status watcher stopped");
                        return;
                    }
                    next = events.next() => {
                        match next {
                            Some(Ok(event)) => {
                                self.handle_event(event).await;
                            }
                            Some(Err(e)) => warn!(%cluster, error = %e, "watch stream error"),
                            None => break,
                        }
                    }
                }
            }

            debug!(%cluster, "Chart watch closed, reconnecting");
            WATCH_RECONNECTS.with_label_values(&[cluster.as_str()]).inc();
            if !sleep_or_cancel(self.reconnect_delay, &token).await {
                break;
            }
        }

        info!(%cluster, "Chart status watcher stopped");
    }

    async fn resolve(&self, cluster: &str) -> Option<Arc<dyn ClusterClient>> {
        match self.clients.client_for(&self.cluster).await {
            Ok(client) => Some(client),
            Err(Error::CredentialsMissing { namespace, name }) => {
                debug!(%cluster, secret_namespace = %namespace, secret = %name, "kubeconfig secret not found yet");
                None
            }
            Err(e) => {
                warn!(%cluster, error = %e, "failed to build cluster client");
                None
            }
        }
    }

    /// Translate one watch event into at most one App status write
    pub async fn handle_event(&self, event: WatchEvent<Chart>) -> EventOutcome {
        match event {
            WatchEvent::Added(chart) | WatchEvent::Modified(chart) => self.mirror(&chart).await,
            WatchEvent::Deleted(chart) => {
                trace!(chart = %chart.name_any(), "ignoring Chart deletion");
                EventOutcome::Skipped
            }
            WatchEvent::Bookmark(_) => EventOutcome::Skipped,
            WatchEvent::Error(resp) => {
                debug!(code = resp.code, reason = %resp.reason, message = %resp.message, "watch error event");
                EventOutcome::Skipped
            }
        }
    }

    async fn mirror(&self, chart: &Chart) -> EventOutcome {
        let annotations = chart.annotations();
        let Some(namespace) = annotations.get(CHART_APP_NAMESPACE_ANNOTATION) else {
            trace!(chart = %chart.name_any(), "Chart has no App namespace annotation");
            return EventOutcome::Skipped;
        };
        let name = annotations
            .get(CHART_APP_NAME_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| chart.name_any());
        let Some(mirror) = StatusMirror::from_chart(chart) else {
            return EventOutcome::Skipped;
        };

        let mut app = match self.apps.get(namespace, &name).await {
            Ok(Some(app)) => app,
            Ok(None) => {
                debug!(%namespace, %name, "App for Chart not found");
                return EventOutcome::Skipped;
            }
            Err(e) => {
                warn!(%namespace, %name, error = %e, "failed to fetch App");
                return EventOutcome::Skipped;
            }
        };
        if !mirror.differs_from(&app) {
            return EventOutcome::Unchanged;
        }

        mirror.apply(&mut app);
        match self.apps.replace_status(&app).await {
            Ok(_) => {
                STATUS_MIRROR_WRITES.with_label_values(&["watcher"]).inc();
                info!(%namespace, %name, status = %mirror.release_status, version = %mirror.version, "mirrored Chart status");
                EventOutcome::Mirrored
            }
            Err(e) if e.is_conflict() || e.is_not_found() => {
                debug!(%namespace, %name, error = %e, "dropped status write");
                EventOutcome::Skipped
            }
            Err(e) => {
                warn!(%namespace, %name, error = %e, "failed to write App status");
                EventOutcome::Skipped
            }
        }
    }
}

/// Sleep for `delay`; false when the token was canceled first
pub(crate) async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
