use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use super::{set_release_reason, VALUES_NOT_FOUND_STATUS};
use crate::adapters::helm_repository::{MANAGED_BY, MANAGED_BY_LABEL};
use crate::adapters::values::{self, VALUES_KEY};
use crate::backoff::{retry_with_backoff, RetryConfig};
use crate::crd::{App, NamespacedRef};
use crate::pipeline::{ControllerContext, Outcome, Step, ValuesRef};
use crate::store::ObjectStore;
use crate::Result;

/// Name of the merged values ConfigMap in the chart namespace
pub fn values_config_map_name(app: &App) -> String {
    format!("{}-chart-values", app.name_any())
}

/// Merges catalog, cluster and user values into the remote values ConfigMap
pub struct ValuesStep {
    apps: Arc<dyn ObjectStore<App>>,
    config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    chart_namespace: String,
}

impl ValuesStep {
    pub fn new(
        apps: Arc<dyn ObjectStore<App>>,
        config_maps: Arc<dyn ObjectStore<ConfigMap>>,
        chart_namespace: String,
    ) -> Self {
        Self {
            apps,
            config_maps,
            chart_namespace,
        }
    }

    fn desired(&self, app: &App, rendered: String) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(values_config_map_name(app)),
                namespace: Some(self.chart_namespace.clone()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    MANAGED_BY.to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(VALUES_KEY.to_string(), rendered)])),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Step<App> for ValuesStep {
    fn name(&self) -> &'static str {
        "values"
    }

    async fn ensure_created(&self, app: &App, ctx: &mut ControllerContext) -> Result<Outcome> {
        let Some(remote) = ctx.available_remote().cloned() else {
            return Ok(Outcome::Continue);
        };

        let sources: Vec<(&str, &NamespacedRef)> = [
            (
                "catalog",
                ctx.catalog
                    .as_ref()
                    .and_then(|c| c.spec.config.as_ref())
                    .and_then(|c| c.config_map.as_ref()),
            ),
            (
                "config",
                app.spec.config.as_ref().and_then(|c| c.config_map.as_ref()),
            ),
            (
                "userConfig",
                app.spec.user_config.as_ref().and_then(|c| c.config_map.as_ref()),
            ),
        ]
        .into_iter()
        .filter_map(|(source, r)| r.map(|r| (source, r)))
        .collect();

        let mut layers = Vec::with_capacity(sources.len());
        for (source, reference) in &sources {
            let Some(cm) = self.config_maps.get(&reference.namespace, &reference.name).await? else {
                info!(app = %app.name_any(), %source, config_map = %reference, "values ConfigMap not found");
                set_release_reason(
                    self.apps.as_ref(),
                    app,
                    VALUES_NOT_FOUND_STATUS,
                    format!("{} ConfigMap {} not found", source, reference),
                )
                .await?;
                return Ok(Outcome::Cancel);
            };
            let raw = cm
                .data
                .as_ref()
                .and_then(|d| d.get(VALUES_KEY))
                .map(String::as_str)
                .unwrap_or_default();
            layers.push(values::parse_layer(
                &format!("{} ConfigMap {}", source, reference),
                raw,
            )?);
        }

        let remote_config_maps = remote.config_maps();
        let name = values_config_map_name(app);
        if layers.is_empty() {
            if remote_config_maps.delete(&self.chart_namespace, &name).await? {
                debug!(app = %app.name_any(), config_map = %name, "removed values ConfigMap without sources");
            }
            ctx.values = None;
            return Ok(Outcome::Continue);
        }

        let (rendered, checksum) = values::render(&values::merge_layers(layers))?;
        let desired = self.desired(app, rendered);

        retry_with_backoff(&RetryConfig::conflict(), "converge values ConfigMap", || async {
            match remote_config_maps.get(&self.chart_namespace, &name).await? {
                None => {
                    remote_config_maps.create(&desired).await?;
                    info!(app = %app.name_any(), config_map = %name, "created values ConfigMap");
                }
                Some(mut live) if live.data != desired.data => {
                    live.data = desired.data.clone();
                    remote_config_maps.replace(&live).await?;
                    info!(app = %app.name_any(), config_map = %name, "updated values ConfigMap");
                }
                Some(_) => {}
            }
            Ok(())
        })
        .await?;

        ctx.values = Some(ValuesRef {
            config_map: NamespacedRef::new(self.chart_namespace.clone(), name),
            checksum,
        });
        Ok(Outcome::Continue)
    }

    async fn ensure_deleted(&self, app: &App, ctx: &mut ControllerContext) -> Result<Outcome> {
        if let Some(remote) = ctx.available_remote() {
            let name = values_config_map_name(app);
            if remote.config_maps().delete(&self.chart_namespace, &name).await? {
                info!(app = %app.name_any(), config_map = %name, "deleted values ConfigMap");
            }
        }
        Ok(Outcome::Continue)
    }
}
