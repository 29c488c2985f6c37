use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::adapters::chart::{build_chart, merge_into, needs_update};
use crate::backoff::{retry_with_backoff, RetryConfig};
use crate::crd::App;
use crate::pipeline::{ControllerContext, Outcome, Step};
use crate::Result;

/// Converges the App's Chart in the remote chart namespace.
///
/// Deletion keeps the App's finalizer until chart-operator has removed the
/// Chart, i.e. until the release is uninstalled.
pub struct ChartStep {
    chart_namespace: String,
}

impl ChartStep {
    pub fn new(chart_namespace: String) -> Self {
        Self { chart_namespace }
    }
}

#[async_trait]
impl Step<App> for ChartStep {
    fn name(&self) -> &'static str {
        "chart"
    }

    async fn ensure_created(&self, app: &App, ctx: &mut ControllerContext) -> Result<Outcome> {
        let (Some(remote), Some(catalog)) = (ctx.available_remote(), ctx.catalog.as_ref()) else {
            return Ok(Outcome::Continue);
        };
        let desired = build_chart(app, catalog, &self.chart_namespace, ctx.values.as_ref());
        let charts = remote.charts();
        let name = app.name_any();

        retry_with_backoff(&RetryConfig::conflict(), "converge Chart", || async {
            match charts.get(&self.chart_namespace, &name).await? {
                None => {
                    charts.create(&desired).await?;
                    info!(app = %name, version = %desired.spec.version, "created Chart");
                }
                Some(live) if needs_update(&live, &desired) => {
                    charts.replace(&merge_into(&live, &desired)).await?;
                    info!(app = %name, version = %desired.spec.version, "updated Chart");
                }
                Some(_) => debug!(app = %name, "Chart up to date"),
            }
            Ok(())
        })
        .await?;

        Ok(Outcome::Continue)
    }

    async fn ensure_deleted(&self, app: &App, ctx: &mut ControllerContext) -> Result<Outcome> {
        let Some(remote) = ctx.available_remote() else {
            return Ok(Outcome::Continue);
        };
        let charts = remote.charts();
        let name = app.name_any();

        let Some(chart) = charts.get(&self.chart_namespace, &name).await? else {
            return Ok(Outcome::Continue);
        };
        if chart.metadata.deletion_timestamp.is_none() {
            charts.delete(&self.chart_namespace, &name).await?;
            info!(app = %name, "deleted Chart");
        }
        // Gone already when it carried no finalizer.
        match charts.get(&self.chart_namespace, &name).await? {
            Some(_) => {
                debug!(app = %name, "waiting for Chart removal");
                Ok(Outcome::KeepFinalizer)
            }
            None => Ok(Outcome::Continue),
        }
    }
}
