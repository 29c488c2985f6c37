//! Per-pass scratch space shared by the steps of one pipeline run

use std::sync::Arc;

use crate::clients::ClusterClient;
use crate::crd::{Catalog, NamespacedRef};

/// State resolved by earlier steps for later ones. Created empty at the start
/// of a pass and dropped at its end; nothing in here outlives the pass.
#[derive(Default)]
pub struct ControllerContext {
    /// Catalog referenced by the App being reconciled
    pub catalog: Option<Catalog>,

    /// Client for the cluster the App is installed into
    pub remote: Option<RemoteClusterHandle>,

    /// Merged values written for the App's Chart
    pub values: Option<ValuesRef>,
}

impl ControllerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The remote client, only when the cluster answered its probe
    pub fn available_remote(&self) -> Option<&Arc<dyn ClusterClient>> {
        self.remote
            .as_ref()
            .filter(|remote| remote.available)
            .map(|remote| &remote.client)
    }
}

/// A resolved remote cluster client together with the result of probing it
#[derive(Clone)]
pub struct RemoteClusterHandle {
    pub client: Arc<dyn ClusterClient>,
    pub available: bool,
}

/// Location and checksum of the merged values ConfigMap
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValuesRef {
    pub config_map: NamespacedRef,
    pub checksum: String,
}
