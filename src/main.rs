//! Giant Swarm App Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client, the
//! shared remote client cache, the App and Catalog controllers and the Chart
//! status watchers.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use app_operator::{
    clients::{KubeClusterClient, KubeconfigClientBuilder, RemoteClients},
    config::OperatorConfig,
    controllers::{app_controller, catalog_controller, Context},
    crd::App,
    metrics,
    store::KubeStore,
    watcher::Supervisor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    // Initialize tracing
    init_tracing();

    config.validate()?;
    info!(?config, "Starting App Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let clients = Arc::new(RemoteClients::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(KubeconfigClientBuilder::new(client.clone())),
        config.client_cache_ttl(),
    ));

    let supervisor = Supervisor::new(
        Arc::new(KubeStore::<App>::new(client.clone())),
        clients.clone(),
        config.chart_namespace.clone(),
        config.watcher_discovery_interval(),
    )?
    .with_watch_namespace(config.watch_namespace.clone());

    let metrics_port = config.metrics_port;
    let context = Context::new(client, config, clients);

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let app_handle = tokio::spawn(app_controller::run(context.clone()));
    let catalog_handle = tokio::spawn(catalog_controller::run(context));

    let shutdown = CancellationToken::new();
    let watcher_handle = tokio::spawn(supervisor.run(shutdown.clone()));

    // Handle graceful shutdown
    tokio::select! {
        res = app_handle => {
            error!("App controller exited unexpectedly: {:?}", res);
        }
        res = catalog_handle => {
            error!("Catalog controller exited unexpectedly: {:?}", res);
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    shutdown.cancel();
    if let Err(e) = watcher_handle.await {
        error!("Status watcher supervisor failed: {}", e);
    }

    info!("App Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,app_operator=debug,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install CTRL+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
