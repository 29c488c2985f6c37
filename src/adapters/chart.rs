//! Chart builder for Apps

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::adapters::helm_repository::{MANAGED_BY, MANAGED_BY_LABEL};
use crate::crd::{
    App, Catalog, Chart, ChartConfig, ChartConfigMapRef, ChartSpec, CHART_APP_NAMESPACE_ANNOTATION,
    CHART_APP_NAME_ANNOTATION, CHART_VALUES_CHECKSUM_ANNOTATION, CORDON_REASON_ANNOTATION,
    CORDON_UNTIL_ANNOTATION,
};
use crate::pipeline::ValuesRef;

/// Location of an App's packaged chart in its Catalog's storage
pub fn tarball_url(catalog: &Catalog, app: &App) -> String {
    format!(
        "{}/{}-{}.tgz",
        catalog.spec.storage.url.trim_end_matches('/'),
        app.spec.name,
        app.spec.version
    )
}

/// Desired Chart for an App in the remote chart namespace
pub fn build_chart(
    app: &App,
    catalog: &Catalog,
    chart_namespace: &str,
    values: Option<&ValuesRef>,
) -> Chart {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        CHART_APP_NAMESPACE_ANNOTATION.to_string(),
        app.namespace().unwrap_or_default(),
    );
    annotations.insert(CHART_APP_NAME_ANNOTATION.to_string(), app.name_any());
    if let Some((reason, until)) = app.cordon() {
        annotations.insert(CORDON_REASON_ANNOTATION.to_string(), reason.to_string());
        annotations.insert(CORDON_UNTIL_ANNOTATION.to_string(), until.to_string());
    }
    if let Some(values) = values {
        annotations.insert(
            CHART_VALUES_CHECKSUM_ANNOTATION.to_string(),
            values.checksum.clone(),
        );
    }

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    Chart {
        metadata: ObjectMeta {
            name: Some(app.name_any()),
            namespace: Some(chart_namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: ChartSpec {
            name: app.spec.name.clone(),
            namespace: app.spec.namespace.clone(),
            version: app.spec.version.clone(),
            tarball_url: tarball_url(catalog, app),
            config: values.map(|v| ChartConfig {
                config_map: Some(ChartConfigMapRef {
                    name: v.config_map.name.clone(),
                    namespace: v.config_map.namespace.clone(),
                }),
            }),
        },
        status: None,
    }
}

const MANAGED_ANNOTATIONS: [&str; 5] = [
    CHART_APP_NAMESPACE_ANNOTATION,
    CHART_APP_NAME_ANNOTATION,
    CORDON_REASON_ANNOTATION,
    CORDON_UNTIL_ANNOTATION,
    CHART_VALUES_CHECKSUM_ANNOTATION,
];

/// Whether the live Chart differs from the desired one in spec or managed annotations
pub fn needs_update(live: &Chart, desired: &Chart) -> bool {
    live.spec != desired.spec
        || MANAGED_ANNOTATIONS
            .iter()
            .any(|key| live.annotations().get(*key) != desired.annotations().get(*key))
}

/// `live` carrying the desired spec and managed annotations. Cordon and
/// checksum annotations absent from `desired` are removed.
pub fn merge_into(live: &Chart, desired: &Chart) -> Chart {
    let mut updated = live.clone();
    updated.spec = desired.spec.clone();
    let annotations = updated.annotations_mut();
    for key in MANAGED_ANNOTATIONS {
        match desired.annotations().get(key) {
            Some(value) => {
                annotations.insert(key.to_string(), value.clone());
            }
            None => {
                annotations.remove(key);
            }
        }
    }
    updated
}
