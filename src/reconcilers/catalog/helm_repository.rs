//! Converges a Catalog's HelmRepository mirrors

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::adapters::helm_repository::{
    desired_mirrors, merge_into, mirror_name, mirror_refs, needs_update, MirrorSettings,
};
use crate::backoff::{retry_with_backoff, RetryConfig};
use crate::crd::{Catalog, CatalogStatus, HelmRepository, NamespacedRef};
use crate::pipeline::{ControllerContext, Outcome, Step};
use crate::store::ObjectStore;
use crate::Result;

/// Keeps exactly one HelmRepository per Catalog repository and records the
/// set in the Catalog status.
///
/// The status write is a merge without resource version. Two passes racing
/// on one Catalog can therefore leave a status written by the older pass
/// until the next resync.
pub struct HelmRepositoryStep {
    catalogs: Arc<dyn ObjectStore<Catalog>>,
    repositories: Arc<dyn ObjectStore<HelmRepository>>,
    settings: MirrorSettings,
}

impl HelmRepositoryStep {
    pub fn new(
        catalogs: Arc<dyn ObjectStore<Catalog>>,
        repositories: Arc<dyn ObjectStore<HelmRepository>>,
        settings: MirrorSettings,
    ) -> Self {
        Self {
            catalogs,
            repositories,
            settings,
        }
    }

    async fn converge(&self, desired: &HelmRepository) -> Result<()> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();

        retry_with_backoff(&RetryConfig::conflict(), "converge HelmRepository", || async {
            match self.repositories.get(&namespace, &name).await? {
                None => {
                    self.repositories.create(desired).await?;
                    info!(%namespace, %name, url = %desired.spec.url, "created HelmRepository");
                }
                Some(live) if needs_update(&live, desired) => {
                    self.repositories.replace(&merge_into(&live, desired)).await?;
                    info!(%namespace, %name, url = %desired.spec.url, "updated HelmRepository");
                }
                Some(_) => {}
            }
            Ok(())
        })
        .await
    }

    async fn remove(&self, mirror: &NamespacedRef) -> Result<()> {
        if self.repositories.delete(&mirror.namespace, &mirror.name).await? {
            info!(namespace = %mirror.namespace, name = %mirror.name, "deleted HelmRepository");
        }
        Ok(())
    }
}

fn recorded_mirrors(catalog: &Catalog) -> &[NamespacedRef] {
    catalog
        .status
        .as_ref()
        .map(|s| s.mirrors.as_slice())
        .unwrap_or_default()
}

#[async_trait]
impl Step<Catalog> for HelmRepositoryStep {
    fn name(&self) -> &'static str {
        "helmrepository"
    }

    async fn ensure_created(&self, catalog: &Catalog, _ctx: &mut ControllerContext) -> Result<Outcome> {
        let desired = desired_mirrors(catalog, &self.settings)?;
        for mirror in &desired {
            self.converge(mirror).await?;
        }

        let desired_refs = mirror_refs(&desired);
        for stale in recorded_mirrors(catalog)
            .iter()
            .filter(|r| !desired_refs.contains(r))
        {
            self.remove(stale).await?;
        }

        if recorded_mirrors(catalog) == desired_refs.as_slice() {
            debug!(catalog = %catalog.name_any(), "Catalog status up to date");
            return Ok(Outcome::Continue);
        }
        let mut updated = catalog.clone();
        updated.status = Some(CatalogStatus {
            mirrors: desired_refs,
        });
        self.catalogs.merge_status(&updated).await?;
        Ok(Outcome::Continue)
    }

    async fn ensure_deleted(&self, catalog: &Catalog, _ctx: &mut ControllerContext) -> Result<Outcome> {
        let namespace = catalog.namespace().unwrap_or_default();
        let catalog_name = catalog.name_any();

        // Malformed entries have no mirror to remove.
        let derivable = std::iter::once(&catalog.spec.storage)
            .chain(catalog.spec.repositories.iter())
            .filter_map(|r| mirror_name(&catalog_name, r).ok())
            .map(|name| NamespacedRef::new(namespace.clone(), name));

        let targets: BTreeSet<NamespacedRef> = derivable
            .chain(recorded_mirrors(catalog).iter().cloned())
            .collect();
        for mirror in &targets {
            self.remove(mirror).await?;
        }
        Ok(Outcome::Continue)
    }
}
