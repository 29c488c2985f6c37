use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use super::{set_release_reason, CATALOG_NOT_FOUND_STATUS};
use crate::crd::{App, Catalog};
use crate::pipeline::{ControllerContext, Outcome, Step};
use crate::store::ObjectStore;
use crate::Result;

/// Resolves the App's Catalog into the context
pub struct CatalogStep {
    apps: Arc<dyn ObjectStore<App>>,
    catalogs: Arc<dyn ObjectStore<Catalog>>,
    default_namespace: String,
}

impl CatalogStep {
    pub fn new(
        apps: Arc<dyn ObjectStore<App>>,
        catalogs: Arc<dyn ObjectStore<Catalog>>,
        default_namespace: String,
    ) -> Self {
        Self {
            apps,
            catalogs,
            default_namespace,
        }
    }

    fn catalog_namespace<'a>(&'a self, app: &'a App) -> &'a str {
        app.spec
            .catalog_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.default_namespace)
    }
}

#[async_trait]
impl Step<App> for CatalogStep {
    fn name(&self) -> &'static str {
        "catalog"
    }

    async fn ensure_created(&self, app: &App, ctx: &mut ControllerContext) -> Result<Outcome> {
        let namespace = self.catalog_namespace(app);
        match self.catalogs.get(namespace, &app.spec.catalog).await? {
            Some(catalog) => {
                ctx.catalog = Some(catalog);
                Ok(Outcome::Continue)
            }
            None => {
                info!(app = %app.name_any(), catalog = %app.spec.catalog, %namespace, "Catalog not found");
                set_release_reason(
                    self.apps.as_ref(),
                    app,
                    CATALOG_NOT_FOUND_STATUS,
                    format!("Catalog {}/{} not found", namespace, app.spec.catalog),
                )
                .await?;
                Ok(Outcome::Cancel)
            }
        }
    }

    async fn ensure_deleted(&self, app: &App, ctx: &mut ControllerContext) -> Result<Outcome> {
        let namespace = self.catalog_namespace(app);
        ctx.catalog = self.catalogs.get(namespace, &app.spec.catalog).await?;
        if ctx.catalog.is_none() {
            debug!(app = %app.name_any(), catalog = %app.spec.catalog, "Catalog gone during deletion");
        }
        Ok(Outcome::Continue)
    }
}
