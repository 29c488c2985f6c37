//! App pipeline: install an App's chart into its target cluster
//!
//! Steps, in the order they run:
//!
//! 1. `paused` cancels create passes while the paused annotation is set
//! 2. `legacyfinalizer` strips the finalizer of older releases
//! 3. `deprecatedsecret` removes the per-App secret older releases created
//! 4. `catalog` resolves the Catalog the chart comes from
//! 5. `clients` resolves and probes the target cluster
//! 6. `values` merges catalog, cluster and user values into one ConfigMap
//! 7. `chart` converges the remote Chart
//! 8. `status` mirrors the Chart status onto the App

mod catalog;
mod chart;
mod clients;
mod deprecated_secret;
mod paused;
mod status;
mod values;

pub use catalog::CatalogStep;
pub use chart::ChartStep;
pub use clients::ClientsStep;
pub use deprecated_secret::DeprecatedSecretStep;
pub use paused::PausedStep;
pub use status::StatusStep;
pub use values::ValuesStep;

use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use tracing::debug;

use crate::clients::ClusterClientProvider;
use crate::crd::{App, AppStatus, Catalog};
use crate::pipeline::Pipeline;
use crate::reconcilers::legacy_finalizer::LegacyFinalizer;
use crate::store::ObjectStore;
use crate::{Error, Result};

/// Release status written when the App's Catalog does not exist
pub const CATALOG_NOT_FOUND_STATUS: &str = "catalog-not-found";

/// Release status written when a referenced values ConfigMap does not exist
pub const VALUES_NOT_FOUND_STATUS: &str = "values-configmap-not-found";

/// Collaborators of the App pipeline
#[derive(Clone)]
pub struct AppPipelineConfig {
    pub apps: Arc<dyn ObjectStore<App>>,
    pub catalogs: Arc<dyn ObjectStore<Catalog>>,
    /// Secrets in the management cluster
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    /// ConfigMaps in the management cluster
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub clients: Arc<dyn ClusterClientProvider>,
    /// Namespace holding Charts in every target cluster
    pub chart_namespace: String,
    /// Catalog namespace for Apps that do not set one
    pub catalog_namespace: String,
}

/// Build the App pipeline. Fails when the chart namespace is empty.
pub fn pipeline(config: AppPipelineConfig) -> Result<Pipeline<App>> {
    if config.chart_namespace.is_empty() {
        return Err(Error::ConfigError("chart namespace must not be empty".to_string()));
    }

    Ok(Pipeline::new("App")
        .step(PausedStep)
        .step(LegacyFinalizer::new(config.apps.clone()))
        .step(DeprecatedSecretStep::new(config.secrets.clone()))
        .step(CatalogStep::new(
            config.apps.clone(),
            config.catalogs.clone(),
            config.catalog_namespace.clone(),
        ))
        .step(ClientsStep::new(config.clients.clone(), config.chart_namespace.clone()))
        .step(ValuesStep::new(
            config.apps.clone(),
            config.config_maps.clone(),
            config.chart_namespace.clone(),
        ))
        .step(ChartStep::new(config.chart_namespace.clone()))
        .step(StatusStep::new(config.apps, config.chart_namespace)))
}

/// Re-read the App and write its status if `update` changed it. The write
/// carries the re-read resource version.
pub(crate) async fn update_app_status<F>(
    apps: &dyn ObjectStore<App>,
    app: &App,
    update: F,
) -> Result<()>
where
    F: FnOnce(&mut AppStatus),
{
    let namespace = app.namespace().unwrap_or_default();
    let name = app.name_any();
    let Some(mut current) = apps.get(&namespace, &name).await? else {
        debug!(%namespace, %name, "App gone before status write");
        return Ok(());
    };

    let before = current.status.clone().unwrap_or_default();
    let mut after = before.clone();
    update(&mut after);
    if after == before {
        return Ok(());
    }
    current.status = Some(after);
    apps.replace_status(&current).await?;
    Ok(())
}

/// Write a release status and reason, leaving the mirrored versions alone
pub(crate) async fn set_release_reason(
    apps: &dyn ObjectStore<App>,
    app: &App,
    status: &str,
    reason: String,
) -> Result<()> {
    update_app_status(apps, app, |s| {
        s.release.status = status.to_string();
        s.release.reason = reason;
    })
    .await
}
