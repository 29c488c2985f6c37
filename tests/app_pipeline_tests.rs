//! Integration tests for the App pipeline and the finalizer-managing reconciler
//!
//! The management cluster is a set of in-memory stores; the workload cluster
//! is a [`FakeCluster`].

mod common;

use std::sync::{Arc, Mutex};

use app_operator::adapters::values::VALUES_KEY;
use app_operator::controllers::Reconciler;
use app_operator::crd::{
    App, Catalog, CatalogRepository, Chart, CHART_VALUES_CHECKSUM_ANNOTATION, PAUSED_ANNOTATION,
};
use app_operator::pipeline::{ControllerContext, Operation, Outcome, Pipeline, Step};
use app_operator::reconcilers::app::{self, AppPipelineConfig, CATALOG_NOT_FOUND_STATUS, VALUES_NOT_FOUND_STATUS};
use app_operator::reconcilers::legacy_finalizer::LEGACY_FINALIZER;
use app_operator::store::{MemoryStore, ObjectStore, WriteOp};
use app_operator::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::ObjectMeta;
use kube::ResourceExt;

use common::{
    app, catalog, chart_for, values_config_map, FakeCluster, FakeProvider, APP_NAMESPACE,
    CHART_NAMESPACE,
};

const FINALIZER: &str = "app-operator.giantswarm.io/app";

// ============================================================================
// Test Helpers
// ============================================================================

struct Management {
    apps: Arc<MemoryStore<App>>,
    catalogs: Arc<MemoryStore<Catalog>>,
    secrets: Arc<MemoryStore<Secret>>,
    config_maps: Arc<MemoryStore<ConfigMap>>,
    provider: Arc<FakeProvider>,
    cluster: Arc<FakeCluster>,
}

impl Management {
    fn new() -> Self {
        let cluster = FakeCluster::new();
        let management = Self {
            apps: Arc::new(MemoryStore::new()),
            catalogs: Arc::new(MemoryStore::new()),
            secrets: Arc::new(MemoryStore::new()),
            config_maps: Arc::new(MemoryStore::new()),
            provider: FakeProvider::new(cluster.clone()),
            cluster,
        };
        management.catalogs.insert(catalog(
            CatalogRepository::new("helm", "https://giantswarm.github.io/app-catalog/"),
            vec![],
        ));
        management.config_maps.insert(values_config_map(
            APP_NAMESPACE,
            "hello-world-user-values",
            "replicas: 2\n",
        ));
        management
    }

    fn reconciler(&self) -> Reconciler<App> {
        let pipeline = app::pipeline(AppPipelineConfig {
            apps: self.apps.clone(),
            catalogs: self.catalogs.clone(),
            secrets: self.secrets.clone(),
            config_maps: self.config_maps.clone(),
            clients: self.provider.clone(),
            chart_namespace: CHART_NAMESPACE.to_string(),
            catalog_namespace: "default".to_string(),
        })
        .unwrap();
        Reconciler::new(self.apps.clone(), pipeline, FINALIZER)
    }

    fn stored_app(&self) -> App {
        self.apps.object(APP_NAMESPACE, "hello-world").unwrap()
    }

    fn remote_chart(&self) -> Option<Chart> {
        self.cluster.charts.object(CHART_NAMESPACE, "hello-world")
    }
}

fn deprecated_secret() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("hello-world-chart-secrets".to_string()),
            namespace: Some(APP_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

// ============================================================================
// Create path
// ============================================================================

#[test]
fn app_pipeline_runs_in_declared_order() {
    let management = Management::new();
    assert_eq!(
        management.reconciler().pipeline().step_names(),
        vec![
            "paused",
            "legacyfinalizer",
            "deprecatedsecret",
            "catalog",
            "clients",
            "values",
            "chart",
            "status"
        ]
    );
}

#[test]
fn empty_chart_namespace_is_rejected() {
    let management = Management::new();
    let result = app::pipeline(AppPipelineConfig {
        apps: management.apps.clone(),
        catalogs: management.catalogs.clone(),
        secrets: management.secrets.clone(),
        config_maps: management.config_maps.clone(),
        clients: management.provider.clone(),
        chart_namespace: String::new(),
        catalog_namespace: "default".to_string(),
    });
    assert!(result.is_err());
}

#[tokio::test]
async fn create_pass_installs_chart_with_merged_values() {
    let management = Management::new();
    let mut legacy = app("hello-world");
    legacy.metadata.finalizers = Some(vec![LEGACY_FINALIZER.to_string()]);
    let seeded = management.apps.insert(legacy);
    management.secrets.insert(deprecated_secret());

    let report = management.reconciler().reconcile(&seeded).await.unwrap();

    assert_eq!(report.operation, Operation::Created);
    assert_eq!(report.executed.len(), 8);
    assert!(!report.canceled());

    assert_eq!(management.stored_app().finalizers(), [FINALIZER]);
    assert!(management.secrets.object(APP_NAMESPACE, "hello-world-chart-secrets").is_none());

    let values = management
        .cluster
        .config_maps
        .object(CHART_NAMESPACE, "hello-world-chart-values")
        .unwrap();
    assert_eq!(values.data.unwrap()[VALUES_KEY], "replicas: 2\n");

    let chart = management.remote_chart().unwrap();
    assert_eq!(
        chart.spec.tarball_url,
        "https://giantswarm.github.io/app-catalog/hello-world-app-1.2.3.tgz"
    );
    assert_eq!(chart.spec.namespace, "hello");
    assert!(chart.annotations().contains_key(CHART_VALUES_CHECKSUM_ANNOTATION));
}

#[tokio::test]
async fn second_pass_mirrors_chart_status_and_leaves_chart_alone() {
    let management = Management::new();
    let seeded = management.apps.insert(app("hello-world"));
    let reconciler = management.reconciler();
    reconciler.reconcile(&seeded).await.unwrap();

    // chart-operator reports the release.
    let mut chart = management.remote_chart().unwrap();
    chart.status = chart_for("hello-world", "DEPLOYED", "1.2.3").status;
    management.cluster.charts.merge_status(&chart).await.unwrap();
    management.cluster.charts.clear_writes();
    management.cluster.config_maps.clear_writes();

    reconciler.reconcile(&management.stored_app()).await.unwrap();

    let status = management.stored_app().status.unwrap();
    assert_eq!(status.release.status, "DEPLOYED");
    assert_eq!(status.version, "1.2.3");
    assert!(management.cluster.charts.writes().is_empty());
    assert!(management.cluster.config_maps.writes().is_empty());
}

#[tokio::test]
async fn changed_values_roll_out_through_checksum() {
    let management = Management::new();
    let seeded = management.apps.insert(app("hello-world"));
    let reconciler = management.reconciler();
    reconciler.reconcile(&seeded).await.unwrap();
    let before = management.remote_chart().unwrap().annotations()[CHART_VALUES_CHECKSUM_ANNOTATION].clone();

    let mut user_values = management
        .config_maps
        .object(APP_NAMESPACE, "hello-world-user-values")
        .unwrap();
    user_values.data = Some([(VALUES_KEY.to_string(), "replicas: 5\n".to_string())].into());
    management.config_maps.replace(&user_values).await.unwrap();

    reconciler.reconcile(&management.stored_app()).await.unwrap();
    let after = management.remote_chart().unwrap().annotations()[CHART_VALUES_CHECKSUM_ANNOTATION].clone();
    assert_ne!(before, after);
}

#[tokio::test]
async fn paused_app_cancels_on_first_step() {
    let management = Management::new();
    let mut paused = app("hello-world");
    paused
        .annotations_mut()
        .insert(PAUSED_ANNOTATION.to_string(), "true".to_string());
    let seeded = management.apps.insert(paused);

    let report = management.reconciler().reconcile(&seeded).await.unwrap();

    assert_eq!(report.executed, vec!["paused"]);
    assert_eq!(report.canceled_by, Some("paused"));
    assert!(management.remote_chart().is_none());
}

#[tokio::test]
async fn missing_catalog_writes_reason_and_cancels() {
    let management = Management::new();
    let mut orphan = app("hello-world");
    orphan.spec.catalog = "helm-stable".to_string();
    let seeded = management.apps.insert(orphan);

    let report = management.reconciler().reconcile(&seeded).await.unwrap();

    assert_eq!(report.canceled_by, Some("catalog"));
    let status = management.stored_app().status.unwrap();
    assert_eq!(status.release.status, CATALOG_NOT_FOUND_STATUS);
    assert!(status.release.reason.contains("helm-stable"));
    assert_eq!(management.provider.resolves.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_kubeconfig_cancels_before_remote_writes() {
    let management = Management::new();
    management.provider.missing_credentials(1);
    let seeded = management.apps.insert(app("hello-world"));

    let report = management.reconciler().reconcile(&seeded).await.unwrap();

    assert_eq!(report.canceled_by, Some("clients"));
    assert!(management.remote_chart().is_none());
    assert!(management.cluster.config_maps.writes().is_empty());
}

#[tokio::test]
async fn missing_values_config_map_writes_reason_and_cancels() {
    let management = Management::new();
    let mut app = app("hello-world");
    app.spec.user_config = Some(app_operator::crd::AppConfig {
        config_map: Some(app_operator::crd::NamespacedRef::new(APP_NAMESPACE, "does-not-exist")),
    });
    let seeded = management.apps.insert(app);

    let report = management.reconciler().reconcile(&seeded).await.unwrap();

    assert_eq!(report.canceled_by, Some("values"));
    assert_eq!(
        management.stored_app().status.unwrap().release.status,
        VALUES_NOT_FOUND_STATUS
    );
    assert!(management.remote_chart().is_none());
}

// ============================================================================
// Delete path
// ============================================================================

#[tokio::test]
async fn deletion_removes_remote_objects_then_finalizer() {
    let management = Management::new();
    let seeded = management.apps.insert(app("hello-world"));
    let reconciler = management.reconciler();
    reconciler.reconcile(&seeded).await.unwrap();

    management.apps.delete(APP_NAMESPACE, "hello-world").await.unwrap();
    let report = reconciler.reconcile(&management.stored_app()).await.unwrap();

    assert_eq!(report.operation, Operation::Deleted);
    assert!(!report.keep_finalizers());
    assert!(management.remote_chart().is_none());
    assert!(management
        .cluster
        .config_maps
        .object(CHART_NAMESPACE, "hello-world-chart-values")
        .is_none());
    assert!(management.apps.object(APP_NAMESPACE, "hello-world").is_none());
}

#[tokio::test]
async fn deletion_waits_for_chart_operator() {
    let management = Management::new();
    let seeded = management.apps.insert(app("hello-world"));
    let reconciler = management.reconciler();
    reconciler.reconcile(&seeded).await.unwrap();

    // chart-operator guards its Chart until the release is uninstalled.
    let mut chart = management.remote_chart().unwrap();
    chart.metadata.finalizers = Some(vec!["chart-operator.giantswarm.io/chart".to_string()]);
    management.cluster.charts.replace(&chart).await.unwrap();

    management.apps.delete(APP_NAMESPACE, "hello-world").await.unwrap();
    let report = reconciler.reconcile(&management.stored_app()).await.unwrap();

    assert_eq!(report.finalizer_kept_by, vec!["chart"]);
    assert_eq!(management.stored_app().finalizers(), [FINALIZER]);
    assert!(management
        .remote_chart()
        .unwrap()
        .metadata
        .deletion_timestamp
        .is_some());
}

#[tokio::test]
async fn deletion_proceeds_without_credentials() {
    let management = Management::new();
    let seeded = management.apps.insert(app("hello-world"));
    let reconciler = management.reconciler();
    reconciler.reconcile(&seeded).await.unwrap();

    management.apps.delete(APP_NAMESPACE, "hello-world").await.unwrap();
    management.provider.missing_credentials(1);
    let report = reconciler.reconcile(&management.stored_app()).await.unwrap();

    assert!(!report.keep_finalizers());
    assert!(management.apps.object(APP_NAMESPACE, "hello-world").is_none());
}

#[tokio::test]
async fn deletion_proceeds_with_unusable_kubeconfig() {
    let management = Management::new();
    let seeded = management.apps.insert(app("hello-world"));
    let reconciler = management.reconciler();
    reconciler.reconcile(&seeded).await.unwrap();

    management.apps.delete(APP_NAMESPACE, "hello-world").await.unwrap();
    management.provider.invalid_credentials(1);
    let report = reconciler.reconcile(&management.stored_app()).await.unwrap();

    assert!(!report.keep_finalizers());
    assert!(management.apps.object(APP_NAMESPACE, "hello-world").is_none());
}

#[tokio::test]
async fn unusable_kubeconfig_fails_create_pass() {
    let management = Management::new();
    management.provider.invalid_credentials(1);
    let seeded = management.apps.insert(app("hello-world"));

    assert!(management.reconciler().reconcile(&seeded).await.is_err());
    assert!(management.remote_chart().is_none());
}

#[tokio::test]
async fn paused_app_deletion_still_cleans_up() {
    let management = Management::new();
    let seeded = management.apps.insert(app("hello-world"));
    let reconciler = management.reconciler();
    reconciler.reconcile(&seeded).await.unwrap();

    let mut paused = management.stored_app();
    paused
        .annotations_mut()
        .insert(PAUSED_ANNOTATION.to_string(), "true".to_string());
    management.apps.replace(&paused).await.unwrap();
    management.apps.delete(APP_NAMESPACE, "hello-world").await.unwrap();

    let report = reconciler.reconcile(&management.stored_app()).await.unwrap();

    assert!(!report.canceled());
    assert!(management.remote_chart().is_none());
    assert!(management.apps.object(APP_NAMESPACE, "hello-world").is_none());
}

// ============================================================================
// Reconciler semantics with recording steps
// ============================================================================

type Log = Arc<Mutex<Vec<&'static str>>>;

struct Recording {
    name: &'static str,
    created: Outcome,
    deleted: Outcome,
    log: Log,
}

#[async_trait]
impl Step<App> for Recording {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn ensure_created(&self, _: &App, _: &mut ControllerContext) -> Result<Outcome> {
        self.log.lock().unwrap().push(self.name);
        Ok(self.created)
    }

    async fn ensure_deleted(&self, _: &App, _: &mut ControllerContext) -> Result<Outcome> {
        self.log.lock().unwrap().push(self.name);
        Ok(self.deleted)
    }
}

fn recording_reconciler(
    apps: Arc<MemoryStore<App>>,
    steps: &[(&'static str, Outcome, Outcome)],
) -> (Reconciler<App>, Log) {
    let log: Log = Arc::default();
    let pipeline = steps
        .iter()
        .fold(Pipeline::new("App"), |p, &(name, created, deleted)| {
            p.step(Recording {
                name,
                created,
                deleted,
                log: log.clone(),
            })
        });
    (Reconciler::new(apps, pipeline, FINALIZER), log)
}

#[tokio::test]
async fn cancel_at_step_k_skips_later_steps_once() {
    let apps = Arc::new(MemoryStore::new());
    let seeded = apps.insert(app("hello-world"));
    let (reconciler, log) = recording_reconciler(
        apps.clone(),
        &[
            ("s1", Outcome::Continue, Outcome::Continue),
            ("s2", Outcome::Cancel, Outcome::Continue),
            ("s3", Outcome::Continue, Outcome::Continue),
        ],
    );

    let report = reconciler.reconcile(&seeded).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["s1", "s2"]);
    assert_eq!(report.executed, vec!["s1", "s2"]);
    assert_eq!(report.canceled_by, Some("s2"));
}

#[tokio::test]
async fn keep_finalizer_leaves_finalizers_unchanged() {
    let apps = Arc::new(MemoryStore::new());
    let mut deleting = app("hello-world");
    deleting.metadata.finalizers = Some(vec![FINALIZER.to_string(), "other.io/finalizer".to_string()]);
    apps.insert(deleting);
    apps.delete(APP_NAMESPACE, "hello-world").await.unwrap();
    apps.clear_writes();

    let (reconciler, log) = recording_reconciler(
        apps.clone(),
        &[
            ("s1", Outcome::Continue, Outcome::KeepFinalizer),
            ("s2", Outcome::Continue, Outcome::Continue),
        ],
    );
    let marked = apps.object(APP_NAMESPACE, "hello-world").unwrap();
    let report = reconciler.reconcile(&marked).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["s1", "s2"]);
    assert_eq!(report.finalizer_kept_by, vec!["s1"]);
    assert_eq!(apps.count(WriteOp::Replace), 0);
    assert_eq!(
        apps.object(APP_NAMESPACE, "hello-world").unwrap().finalizers(),
        [FINALIZER, "other.io/finalizer"]
    );
}

#[tokio::test]
async fn clean_deletion_removes_only_own_finalizer() {
    let apps = Arc::new(MemoryStore::new());
    let mut deleting = app("hello-world");
    deleting.metadata.finalizers = Some(vec![FINALIZER.to_string(), "other.io/finalizer".to_string()]);
    apps.insert(deleting);
    apps.delete(APP_NAMESPACE, "hello-world").await.unwrap();

    let (reconciler, _) = recording_reconciler(
        apps.clone(),
        &[("s1", Outcome::Continue, Outcome::Continue)],
    );
    let marked = apps.object(APP_NAMESPACE, "hello-world").unwrap();
    reconciler.reconcile(&marked).await.unwrap();

    assert_eq!(
        apps.object(APP_NAMESPACE, "hello-world").unwrap().finalizers(),
        ["other.io/finalizer"]
    );
}

#[tokio::test]
async fn cancel_on_delete_path_removes_own_finalizer() {
    let apps = Arc::new(MemoryStore::new());
    let mut deleting = app("hello-world");
    deleting.metadata.finalizers = Some(vec![FINALIZER.to_string(), "other.io/finalizer".to_string()]);
    apps.insert(deleting);
    apps.delete(APP_NAMESPACE, "hello-world").await.unwrap();

    let (reconciler, log) = recording_reconciler(
        apps.clone(),
        &[
            ("s1", Outcome::Continue, Outcome::Cancel),
            ("s2", Outcome::Continue, Outcome::Continue),
        ],
    );
    let marked = apps.object(APP_NAMESPACE, "hello-world").unwrap();
    let report = reconciler.reconcile(&marked).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["s1"]);
    assert_eq!(report.canceled_by, Some("s1"));
    assert!(report.finalizer_kept_by.is_empty());
    assert_eq!(
        apps.object(APP_NAMESPACE, "hello-world").unwrap().finalizers(),
        ["other.io/finalizer"]
    );
}
