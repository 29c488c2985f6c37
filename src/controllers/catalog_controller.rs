//! Controller for Catalog resources

use futures::StreamExt;
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
use crate::crd::{Catalog, HelmRepository};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::reconcilers::catalog;
use crate::store::KubeStore;
use crate::{Error, Result};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "app-operator.giantswarm.io/catalog";

struct State {
    reconciler: Reconciler<Catalog>,
    resync: Duration,
}

/// Run the Catalog controller
pub async fn run(ctx: Arc<Context>) -> Result<()> {
    let client = ctx.client.clone();
    let catalogs: Arc<KubeStore<Catalog>> = Arc::new(KubeStore::new(client.clone()));
    let pipeline = catalog::pipeline(
        catalogs.clone(),
        Arc::new(KubeStore::<HelmRepository>::new(client.clone())),
        ctx.config.mirror_settings(),
    );
    let state = Arc::new(State {
        reconciler: Reconciler::new(catalogs, pipeline, FINALIZER),
        resync: ctx.config.resync_period(),
    });

    let (api, mirrors): (Api<Catalog>, Api<HelmRepository>) = match &ctx.config.watch_namespace {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client, ns)),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    info!("Starting Catalog controller");

    Controller::new(api, Config::default().any_semantic())
        .owns(mirrors, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("Catalog controller stopped");
    Ok(())
}

/// Reconcile a Catalog resource
#[instrument(skip(catalog, state), fields(name = %catalog.name_any(), namespace = catalog.namespace().unwrap_or_default()))]
async fn reconcile(catalog: Arc<Catalog>, state: Arc<State>) -> Result<Action> {
    let start = std::time::Instant::now();
    let ns = catalog.namespace().unwrap_or_default();
    let name = catalog.name_any();

    RECONCILIATIONS.with_label_values(&["Catalog"]).inc();

    let result = state.reconciler.reconcile(&catalog).await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["Catalog"])
        .observe(duration);

    match &result {
        Ok(_) => info!(
            "Successfully reconciled {}/{} in {:.2}s",
            ns, name, duration
        ),
        Err(e) => {
            RECONCILIATION_ERRORS.with_label_values(&["Catalog"]).inc();
            error!("Failed to reconcile {}/{}: {:?}", ns, name, e);
        }
    }

    let report = result?;
    Ok(if catalog.metadata.deletion_timestamp.is_some() && !report.keep_finalizers() {
        Action::await_change()
    } else {
        Action::requeue(state.resync)
    })
}

/// Error policy for the controller
fn error_policy(catalog: Arc<Catalog>, err: &Error, _state: Arc<State>) -> Action {
    let ns = catalog.namespace().unwrap_or_default();
    let name = catalog.name_any();

    error!("Reconciliation error for {}/{}: {:?}", ns, name, err);

    match err {
        Error::KubeError(_) | Error::Conflict { .. } => Action::requeue(Duration::from_secs(30)),
        // Malformed repository entries only change with the Catalog itself.
        Error::ValidationError(_) => Action::requeue(Duration::from_secs(300)),
        _ => Action::requeue(Duration::from_secs(60)),
    }
}
