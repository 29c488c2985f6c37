use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::info;

use crate::crd::App;
use crate::pipeline::{ControllerContext, Outcome, Step};
use crate::store::ObjectStore;
use crate::Result;

/// Name of the per-App secret older releases created next to the App
pub fn deprecated_secret_name(app: &App) -> String {
    format!("{}-chart-secrets", app.name_any())
}

/// Deletes the deprecated per-App secret; an absent secret is success
pub struct DeprecatedSecretStep {
    secrets: Arc<dyn ObjectStore<Secret>>,
}

impl DeprecatedSecretStep {
    pub fn new(secrets: Arc<dyn ObjectStore<Secret>>) -> Self {
        Self { secrets }
    }

    async fn remove(&self, app: &App) -> Result<Outcome> {
        let namespace = app.namespace().unwrap_or_default();
        let name = deprecated_secret_name(app);
        if self.secrets.get(&namespace, &name).await?.is_none() {
            return Ok(Outcome::Continue);
        }
        if self.secrets.delete(&namespace, &name).await? {
            info!(%namespace, secret = %name, "deleted deprecated chart secret");
        }
        Ok(Outcome::Continue)
    }
}

#[async_trait]
impl Step<App> for DeprecatedSecretStep {
    fn name(&self) -> &'static str {
        "deprecatedsecret"
    }

    async fn ensure_created(&self, app: &App, _ctx: &mut ControllerContext) -> Result<Outcome> {
        self.remove(app).await
    }

    async fn ensure_deleted(&self, app: &App, _ctx: &mut ControllerContext) -> Result<Outcome> {
        self.remove(app).await
    }
}
