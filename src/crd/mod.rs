//! Custom Resource Definitions for the App Operator
//!
//! `App` and `Catalog` are owned by this operator. `Chart` is owned by
//! chart-operator in each workload cluster and `HelmRepository` by Flux; their
//! types are modelled here only as far as this operator reads and writes them.

mod app;
mod catalog;
mod chart;
mod helm_repository;

pub use app::*;
pub use catalog::*;
pub use chart::*;
pub use helm_repository::*;

use kube::CustomResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Generate CRD YAML manifests for the custom resources owned by this operator
pub fn generate_crds() -> Result<Vec<String>> {
    Ok(vec![
        serde_yaml::to_string(&App::crd())?,
        serde_yaml::to_string(&Catalog::crd())?,
    ])
}

/// Reference to a namespaced object by name
#[derive(
    Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedRef {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
}

impl NamespacedRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for NamespacedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
