//! Catalog Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{AppConfig, NamespacedRef};

/// Catalog resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "application.giantswarm.io",
    version = "v1alpha1",
    kind = "Catalog",
    plural = "catalogs",
    singular = "catalog",
    namespaced,
    status = "CatalogStatus",
    printcolumn = r#"{"name": "Catalog URL", "type": "string", "jsonPath": ".spec.storage.URL"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSpec {
    /// Display title
    #[serde(default)]
    pub title: String,

    /// Display description
    #[serde(default)]
    pub description: String,

    /// Primary chart repository
    pub storage: CatalogRepository,

    /// Additional chart repositories, in order of preference
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<CatalogRepository>,

    /// Catalog-wide default values for every App using this Catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AppConfig>,
}

/// A chart repository location
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct CatalogRepository {
    /// Repository type (helm or oci)
    #[serde(rename = "type")]
    pub type_: String,

    /// Repository URL
    #[serde(rename = "URL")]
    pub url: String,
}

impl CatalogRepository {
    pub fn new(type_: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            url: url.into(),
        }
    }
}

/// Catalog status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    /// HelmRepository objects currently mirroring this Catalog's repositories
    #[serde(default)]
    pub mirrors: Vec<NamespacedRef>,
}
