use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::crd::App;
use crate::pipeline::{ControllerContext, Outcome, Step};
use crate::Result;

/// Cancels create and update passes of a paused App.
///
/// Deletion is not blocked: a paused App still has its remote Chart and
/// values removed before the finalizer goes.
pub struct PausedStep;

#[async_trait]
impl Step<App> for PausedStep {
    fn name(&self) -> &'static str {
        "paused"
    }

    async fn ensure_created(&self, app: &App, _ctx: &mut ControllerContext) -> Result<Outcome> {
        if app.is_paused() {
            info!(namespace = ?app.namespace(), name = %app.name_any(), "App is paused");
            return Ok(Outcome::Cancel);
        }
        Ok(Outcome::Continue)
    }

    async fn ensure_deleted(&self, app: &App, _ctx: &mut ControllerContext) -> Result<Outcome> {
        if app.is_paused() {
            debug!(namespace = ?app.namespace(), name = %app.name_any(), "deleting paused App");
        }
        Ok(Outcome::Continue)
    }
}
