//! App Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::NamespacedRef;

/// Annotation that stops all reconciliation of an App while set to "true"
pub const PAUSED_ANNOTATION: &str = "app-operator.giantswarm.io/paused";

/// Annotation carrying the reason an App's chart is cordoned
pub const CORDON_REASON_ANNOTATION: &str = "chart-operator.giantswarm.io/cordon-reason";

/// Annotation carrying the time until which an App's chart is cordoned
pub const CORDON_UNTIL_ANNOTATION: &str = "chart-operator.giantswarm.io/cordon-until";

/// App resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "application.giantswarm.io",
    version = "v1alpha1",
    kind = "App",
    plural = "apps",
    singular = "app",
    namespaced,
    status = "AppStatus",
    printcolumn = r#"{"name": "Installed Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.release.status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Name of the chart in the catalog
    pub name: String,

    /// Namespace the chart is installed into on the target cluster
    pub namespace: String,

    /// Chart version
    pub version: String,

    /// Name of the Catalog providing the chart
    pub catalog: String,

    /// Namespace of the Catalog (defaults to the operator's catalog namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_namespace: Option<String>,

    /// Target cluster connection
    #[serde(default)]
    pub kube_config: AppKubeConfig,

    /// Cluster-level values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AppConfig>,

    /// User-level values, applied on top of everything else
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_config: Option<AppConfig>,
}

/// Target cluster connection for an App
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppKubeConfig {
    /// Install into the cluster this operator runs in
    #[serde(default)]
    pub in_cluster: bool,

    /// Secret holding the kubeconfig of the target cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<NamespacedRef>,

    /// Kubeconfig context to use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<KubeConfigContext>,
}

/// Kubeconfig context selection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeConfigContext {
    /// Context name
    pub name: String,
}

/// Values source for an App
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// ConfigMap holding YAML values under the `values` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<NamespacedRef>,
}

/// App status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    /// Upstream application version of the deployed chart
    #[serde(default)]
    pub app_version: String,

    /// Deployed chart version
    #[serde(default)]
    pub version: String,

    /// Helm release state
    #[serde(default)]
    pub release: AppStatusRelease,
}

/// Helm release state reported for an App
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusRelease {
    /// Release status, e.g. DEPLOYED or FAILED
    #[serde(default)]
    pub status: String,

    /// Reason for the current status
    #[serde(default)]
    pub reason: String,

    /// Last time the release was deployed. Serialized as null when unset so
    /// a status merge patch clears it.
    #[serde(default)]
    pub last_deployed: Option<DateTime<Utc>>,
}

impl App {
    /// Whether the paused annotation is set to "true"
    pub fn is_paused(&self) -> bool {
        self.annotations()
            .get(PAUSED_ANNOTATION)
            .is_some_and(|v| v == "true")
    }

    /// Cordon reason and deadline, present only when both annotations are set
    pub fn cordon(&self) -> Option<(&str, &str)> {
        let annotations = self.annotations();
        let reason = annotations.get(CORDON_REASON_ANNOTATION)?;
        let until = annotations.get(CORDON_UNTIL_ANNOTATION)?;
        Some((reason.as_str(), until.as_str()))
    }
}
