//! Flux HelmRepository, the mirror object derived from Catalog repositories

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// HelmRepository specification (subset managed by this operator)
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "source.toolkit.fluxcd.io",
    version = "v1beta2",
    kind = "HelmRepository",
    plural = "helmrepositories",
    singular = "helmrepository",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepositorySpec {
    /// Poll interval, e.g. "10m"
    pub interval: String,

    /// Timeout for index download operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Repository type, "default" for HTTP(S) Helm repositories or "oci"
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Repository URL
    pub url: String,
}
