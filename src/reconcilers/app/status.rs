use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use super::update_app_status;
use crate::adapters::status::StatusMirror;
use crate::crd::App;
use crate::metrics::prometheus::STATUS_MIRROR_WRITES;
use crate::pipeline::{ControllerContext, Outcome, Step};
use crate::store::ObjectStore;
use crate::Result;

/// Pulls the remote Chart status onto the App on every pass
pub struct StatusStep {
    apps: Arc<dyn ObjectStore<App>>,
    chart_namespace: String,
}

impl StatusStep {
    pub fn new(apps: Arc<dyn ObjectStore<App>>, chart_namespace: String) -> Self {
        Self {
            apps,
            chart_namespace,
        }
    }
}

#[async_trait]
impl Step<App> for StatusStep {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn ensure_created(&self, app: &App, ctx: &mut ControllerContext) -> Result<Outcome> {
        let Some(remote) = ctx.available_remote() else {
            return Ok(Outcome::Continue);
        };
        let Some(chart) = remote.charts().get(&self.chart_namespace, &app.name_any()).await? else {
            return Ok(Outcome::Continue);
        };
        let Some(mirror) = StatusMirror::from_chart(&chart) else {
            debug!(app = %app.name_any(), "Chart has no status yet");
            return Ok(Outcome::Continue);
        };
        if !mirror.differs_from(app) {
            return Ok(Outcome::Continue);
        }

        let result =
            update_app_status(self.apps.as_ref(), app, |status| mirror.write_into(status)).await;
        match result {
            Ok(()) => {
                STATUS_MIRROR_WRITES.with_label_values(&["pipeline"]).inc();
                Ok(Outcome::Continue)
            }
            // The status watcher converges it on the next event.
            Err(e) if e.is_conflict() => {
                debug!(app = %app.name_any(), error = %e, "status write lost a race");
                Ok(Outcome::Continue)
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_deleted(&self, _app: &App, _ctx: &mut ControllerContext) -> Result<Outcome> {
        Ok(Outcome::Continue)
    }
}
