//! Catalog pipeline: `legacyfinalizer`, then `helmrepository`

pub mod helm_repository;

pub use helm_repository::HelmRepositoryStep;

use std::sync::Arc;

use crate::adapters::helm_repository::MirrorSettings;
use crate::crd::{Catalog, HelmRepository};
use crate::pipeline::Pipeline;
use crate::reconcilers::legacy_finalizer::LegacyFinalizer;
use crate::store::ObjectStore;

pub fn pipeline(
    catalogs: Arc<dyn ObjectStore<Catalog>>,
    repositories: Arc<dyn ObjectStore<HelmRepository>>,
    settings: MirrorSettings,
) -> Pipeline<Catalog> {
    Pipeline::new("Catalog")
        .step(LegacyFinalizer::new(catalogs.clone()))
        .step(HelmRepositoryStep::new(catalogs, repositories, settings))
}
