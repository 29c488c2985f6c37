//! Chart resource as served by chart-operator in workload clusters

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation on a Chart naming the namespace of the App it was created for
pub const CHART_APP_NAMESPACE_ANNOTATION: &str = "chart-operator.giantswarm.io/app-namespace";

/// Annotation on a Chart naming the App it was created for
pub const CHART_APP_NAME_ANNOTATION: &str = "chart-operator.giantswarm.io/app-name";

/// Annotation carrying the checksum of the values the Chart was rendered with
pub const CHART_VALUES_CHECKSUM_ANNOTATION: &str = "app-operator.giantswarm.io/values-checksum";

/// Chart resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "application.giantswarm.io",
    version = "v1alpha1",
    kind = "Chart",
    plural = "charts",
    singular = "chart",
    namespaced,
    status = "ChartStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Chart name
    pub name: String,

    /// Namespace the release is installed into
    pub namespace: String,

    /// Chart version
    pub version: String,

    /// Location of the packaged chart
    #[serde(rename = "tarballURL")]
    pub tarball_url: String,

    /// Values for the release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ChartConfig>,
}

/// Values reference for a Chart
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    /// ConfigMap holding the merged values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ChartConfigMapRef>,
}

/// ConfigMap reference on a Chart
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfigMapRef {
    pub name: String,
    pub namespace: String,
}

/// Chart status, written by chart-operator
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartStatus {
    #[serde(default)]
    pub app_version: String,

    #[serde(default)]
    pub version: String,

    /// Reason chart-operator could not reconcile the Chart
    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub release: ChartStatusRelease,
}

/// Helm release state as observed by chart-operator
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartStatusRelease {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deployed: Option<DateTime<Utc>>,
}
