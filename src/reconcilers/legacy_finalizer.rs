//! Removal of the finalizer written by earlier operator releases

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::info;

use crate::backoff::{retry_with_backoff, RetryConfig};
use crate::pipeline::{ControllerContext, Outcome, Step};
use crate::store::ObjectStore;
use crate::Result;

/// Finalizer set by the operatorkit based releases
pub const LEGACY_FINALIZER: &str = "operatorkit.giantswarm.io/app-operator";

/// Strips [`LEGACY_FINALIZER`] on both lifecycle paths
pub struct LegacyFinalizer<K> {
    store: Arc<dyn ObjectStore<K>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> LegacyFinalizer<K> {
    pub fn new(store: Arc<dyn ObjectStore<K>>) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }
}

impl<K> LegacyFinalizer<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn remove(&self, obj: &K) -> Result<Outcome> {
        if !obj.finalizers().iter().any(|f| f == LEGACY_FINALIZER) {
            return Ok(Outcome::Continue);
        }
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        retry_with_backoff(&RetryConfig::conflict(), "remove legacy finalizer", || async {
            let Some(mut current) = self.store.get(&namespace, &name).await? else {
                return Ok(());
            };
            if !current.finalizers().iter().any(|f| f == LEGACY_FINALIZER) {
                return Ok(());
            }
            current.finalizers_mut().retain(|f| f != LEGACY_FINALIZER);
            self.store.replace(&current).await?;
            Ok(())
        })
        .await?;

        info!(%namespace, %name, finalizer = LEGACY_FINALIZER, "removed legacy finalizer");
        Ok(Outcome::Continue)
    }
}

#[async_trait]
impl<K> Step<K> for LegacyFinalizer<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "legacyfinalizer"
    }

    async fn ensure_created(&self, obj: &K, _ctx: &mut ControllerContext) -> Result<Outcome> {
        self.remove(obj).await
    }

    async fn ensure_deleted(&self, obj: &K, _ctx: &mut ControllerContext) -> Result<Outcome> {
        self.remove(obj).await
    }
}
