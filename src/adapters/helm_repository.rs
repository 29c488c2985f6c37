//! HelmRepository builder for Catalog repository mirrors

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use url::Url;

use crate::crd::{Catalog, CatalogRepository, HelmRepository, HelmRepositorySpec, NamespacedRef};
use crate::{Error, Result};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "app-operator";
pub const CATALOG_LABEL: &str = "application.giantswarm.io/catalog";

/// Which Catalog field a mirror was derived from: `storage` or `repository`
pub const SOURCE_ANNOTATION: &str = "application.giantswarm.io/catalog-source";

/// Polling settings applied to every mirror
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorSettings {
    pub interval: String,
    pub timeout: String,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            interval: "10m".to_string(),
            timeout: "60s".to_string(),
        }
    }
}

/// Flux repository type for a Catalog repository type
pub fn flux_type(repository_type: &str) -> Result<&'static str> {
    match repository_type {
        "helm" => Ok("default"),
        "oci" => Ok("oci"),
        other => Err(Error::ValidationError(format!(
            "unsupported catalog repository type '{}', expected helm or oci",
            other
        ))),
    }
}

/// Deterministic mirror name: `<catalog>-<type>-<host>[-<last path segment>]`
pub fn mirror_name(catalog: &str, repository: &CatalogRepository) -> Result<String> {
    flux_type(&repository.type_)?;
    let url = Url::parse(&repository.url).map_err(|e| {
        Error::ValidationError(format!("invalid repository URL '{}': {}", repository.url, e))
    })?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            Error::ValidationError(format!("repository URL '{}' has no host", repository.url))
        })?;

    let mut name = format!("{}-{}-{}", catalog, repository.type_, host);
    let last_segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last());
    if let Some(segment) = last_segment {
        name.push('-');
        name.push_str(segment);
    }
    Ok(name.to_lowercase())
}

/// Every mirror the Catalog should have, storage first. Entries that derive
/// the same name collapse into the first one.
pub fn desired_mirrors(catalog: &Catalog, settings: &MirrorSettings) -> Result<Vec<HelmRepository>> {
    let sources = std::iter::once((&catalog.spec.storage, "storage"))
        .chain(catalog.spec.repositories.iter().map(|r| (r, "repository")));

    let mut mirrors: Vec<HelmRepository> = Vec::new();
    for (repository, source) in sources {
        let mirror = build_mirror(catalog, repository, source, settings)?;
        if mirrors.iter().all(|m| m.name_any() != mirror.name_any()) {
            mirrors.push(mirror);
        }
    }
    Ok(mirrors)
}

/// References to the given mirrors, in order
pub fn mirror_refs(mirrors: &[HelmRepository]) -> Vec<NamespacedRef> {
    mirrors
        .iter()
        .map(|m| NamespacedRef::new(m.namespace().unwrap_or_default(), m.name_any()))
        .collect()
}

fn build_mirror(
    catalog: &Catalog,
    repository: &CatalogRepository,
    source: &str,
    settings: &MirrorSettings,
) -> Result<HelmRepository> {
    let catalog_name = catalog.name_any();
    let name = mirror_name(&catalog_name, repository)?;

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(CATALOG_LABEL.to_string(), catalog_name);

    let mut annotations = BTreeMap::new();
    annotations.insert(SOURCE_ANNOTATION.to_string(), source.to_string());

    Ok(HelmRepository {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: catalog.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: catalog.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: HelmRepositorySpec {
            interval: settings.interval.clone(),
            timeout: Some(settings.timeout.clone()),
            type_: Some(flux_type(&repository.type_)?.to_string()),
            url: repository.url.clone(),
        },
    })
}

/// Whether `live` differs from `desired` in spec or in any managed label or annotation
pub fn needs_update(live: &HelmRepository, desired: &HelmRepository) -> bool {
    let contains_all = |have: &BTreeMap<String, String>, want: &BTreeMap<String, String>| {
        want.iter().all(|(k, v)| have.get(k) == Some(v))
    };
    live.spec != desired.spec
        || !contains_all(live.labels(), desired.labels())
        || !contains_all(live.annotations(), desired.annotations())
}

/// `live` with the desired spec and managed metadata applied; the resource
/// version and foreign metadata are preserved.
pub fn merge_into(live: &HelmRepository, desired: &HelmRepository) -> HelmRepository {
    let mut updated = live.clone();
    updated.spec = desired.spec.clone();
    updated
        .labels_mut()
        .extend(desired.labels().iter().map(|(k, v)| (k.clone(), v.clone())));
    updated
        .annotations_mut()
        .extend(desired.annotations().iter().map(|(k, v)| (k.clone(), v.clone())));
    if updated.meta().owner_references.is_none() {
        updated.meta_mut().owner_references = desired.meta().owner_references.clone();
    }
    updated
}
