//! Controller for App resources

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::controllers::{Context, Reconciler};
use crate::crd::{App, Catalog};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::pipeline::Operation;
use crate::reconcilers::app::{self, AppPipelineConfig};
use crate::store::KubeStore;
use crate::{Error, Result};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "app-operator.giantswarm.io/app";

/// Requeue delay while a deletion waits on remote cleanup
const DELETION_RECHECK: Duration = Duration::from_secs(30);

struct State {
    reconciler: Reconciler<App>,
    resync: Duration,
}

/// Run the App controller
pub async fn run(ctx: Arc<Context>) -> Result<()> {
    let client = ctx.client.clone();
    let apps: Arc<KubeStore<App>> = Arc::new(KubeStore::new(client.clone()));

    let pipeline = app::pipeline(AppPipelineConfig {
        apps: apps.clone(),
        catalogs: Arc::new(KubeStore::<Catalog>::new(client.clone())),
        secrets: Arc::new(KubeStore::<Secret>::new(client.clone())),
        config_maps: Arc::new(KubeStore::<ConfigMap>::new(client.clone())),
        clients: ctx.clients.clone(),
        chart_namespace: ctx.config.chart_namespace.clone(),
        catalog_namespace: ctx.config.catalog_namespace.clone(),
    })?;
    let state = Arc::new(State {
        reconciler: Reconciler::new(apps, pipeline, FINALIZER),
        resync: ctx.config.resync_period(),
    });

    let api: Api<App> = match &ctx.config.watch_namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    info!(steps = ?state.reconciler.pipeline().step_names(), "Starting App controller");

    Controller::new(api, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("App controller stopped");
    Ok(())
}

/// Reconcile an App resource
#[instrument(skip(app, state), fields(name = %app.name_any(), namespace = app.namespace().unwrap_or_default()))]
async fn reconcile(app: Arc<App>, state: Arc<State>) -> Result<Action> {
    let start = std::time::Instant::now();
    let ns = app.namespace().unwrap_or_default();
    let name = app.name_any();

    RECONCILIATIONS.with_label_values(&["App"]).inc();

    let result = state.reconciler.reconcile(&app).await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["App"])
        .observe(duration);

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            RECONCILIATION_ERRORS.with_label_values(&["App"]).inc();
            error!("Failed to reconcile {}/{}: {:?}", ns, name, e);
            return Err(e);
        }
    };

    info!(
        executed = ?report.executed,
        canceled_by = ?report.canceled_by,
        "Reconciled App {}/{} in {:.2}s",
        ns,
        name,
        duration
    );

    Ok(match report.operation {
        Operation::Deleted if report.keep_finalizers() => Action::requeue(DELETION_RECHECK),
        Operation::Deleted => Action::await_change(),
        Operation::Created => Action::requeue(state.resync),
    })
}

/// Error policy for the controller
fn error_policy(app: Arc<App>, err: &Error, _state: Arc<State>) -> Action {
    let ns = app.namespace().unwrap_or_default();
    let name = app.name_any();

    error!("Reconciliation error for {}/{}: {:?}", ns, name, err);

    match err {
        Error::Conflict { .. } => Action::requeue(Duration::from_secs(5)),
        Error::KubeError(_) => Action::requeue(Duration::from_secs(30)),
        Error::ConfigError(_) | Error::ValidationError(_) | Error::SecretError(_) => {
            Action::requeue(Duration::from_secs(300))
        }
        _ => Action::requeue(Duration::from_secs(60)),
    }
}
