use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::clients::{ClusterClientProvider, ClusterRef, ProbeError};
use crate::crd::App;
use crate::pipeline::{ControllerContext, Operation, Outcome, RemoteClusterHandle, Step};
use crate::{Error, Result};

/// Resolves the client for the App's target cluster and probes it.
///
/// On the create path an unready cluster cancels the pass. On the delete path
/// the pass goes on and the remote steps skip their cleanup.
pub struct ClientsStep {
    clients: Arc<dyn ClusterClientProvider>,
    chart_namespace: String,
}

impl ClientsStep {
    pub fn new(clients: Arc<dyn ClusterClientProvider>, chart_namespace: String) -> Self {
        Self {
            clients,
            chart_namespace,
        }
    }

    async fn resolve(
        &self,
        app: &App,
        ctx: &mut ControllerContext,
        operation: Operation,
    ) -> Result<Outcome> {
        let unready = match operation {
            Operation::Created => Outcome::Cancel,
            Operation::Deleted => Outcome::Continue,
        };
        let name = app.name_any();
        let cluster = match ClusterRef::for_app(app) {
            Ok(cluster) => cluster,
            Err(e) if operation == Operation::Deleted => {
                debug!(app = %name, error = %e, "no usable kubeConfig, skipping remote cleanup");
                return Ok(Outcome::Continue);
            }
            Err(e) => return Err(e),
        };

        let client = match self.clients.client_for(&cluster).await {
            Ok(client) => client,
            Err(Error::CredentialsMissing { namespace, name: secret }) => {
                info!(app = %name, secret_namespace = %namespace, secret = %secret, "kubeconfig secret missing");
                return Ok(unready);
            }
            // A broken kubeconfig secret must not block deletion forever.
            Err(e) if operation == Operation::Deleted && !e.is_retryable() => {
                warn!(app = %name, %cluster, error = %e, "no client for target cluster, skipping remote cleanup");
                return Ok(Outcome::Continue);
            }
            Err(e) => return Err(e),
        };

        let available = match client.probe_charts(&self.chart_namespace).await {
            Ok(()) => true,
            Err(ProbeError::Unreachable(reason)) => {
                debug!(app = %name, %cluster, %reason, "cluster API unreachable");
                false
            }
            Err(ProbeError::KindNotInstalled(reason)) => {
                info!(app = %name, %cluster, %reason, "Chart kind not installed yet");
                false
            }
            Err(ProbeError::Other(e)) => {
                error!(app = %name, %cluster, error = %e, "cluster probe failed");
                false
            }
        };

        ctx.remote = Some(RemoteClusterHandle { client, available });
        Ok(if available { Outcome::Continue } else { unready })
    }
}

#[async_trait]
impl Step<App> for ClientsStep {
    fn name(&self) -> &'static str {
        "clients"
    }

    async fn ensure_created(&self, app: &App, ctx: &mut ControllerContext) -> Result<Outcome> {
        self.resolve(app, ctx, Operation::Created).await
    }

    async fn ensure_deleted(&self, app: &App, ctx: &mut ControllerContext) -> Result<Outcome> {
        self.resolve(app, ctx, Operation::Deleted).await
    }
}
