//! Controller implementations for watching and reconciling resources

pub mod app_controller;
pub mod catalog_controller;
pub mod reconciler;

pub use reconciler::Reconciler;

use kube::Client;
use std::sync::Arc;

use crate::clients::RemoteClients;
use crate::config::OperatorConfig;

/// Shared context for controllers
pub struct Context {
    /// Kubernetes client for the management cluster
    pub client: Client,
    pub config: OperatorConfig,
    /// Remote cluster clients shared with the status watchers
    pub clients: Arc<RemoteClients>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: OperatorConfig, clients: Arc<RemoteClients>) -> Arc<Self> {
        Arc::new(Self {
            client,
            config,
            clients,
        })
    }
}
