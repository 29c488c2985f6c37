//! Pipeline driver with finalizer management

use std::sync::Arc;

use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::backoff::{retry_with_backoff, RetryConfig};
use crate::pipeline::{ControllerContext, PassReport, Pipeline};
use crate::store::ObjectStore;
use crate::Result;

/// Runs one pipeline pass per event and owns the operator's finalizer on
/// the reconciled objects.
///
/// Live objects get the finalizer before their first pass. Objects marked
/// for deletion run the deletion path, and the finalizer is removed only
/// when no step kept it and no step failed.
pub struct Reconciler<K> {
    store: Arc<dyn ObjectStore<K>>,
    pipeline: Pipeline<K>,
    finalizer: &'static str,
}

impl<K> Reconciler<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn ObjectStore<K>>, pipeline: Pipeline<K>, finalizer: &'static str) -> Self {
        Self {
            store,
            pipeline,
            finalizer,
        }
    }

    pub fn pipeline(&self) -> &Pipeline<K> {
        &self.pipeline
    }

    pub async fn reconcile(&self, obj: &K) -> Result<PassReport> {
        let mut ctx = ControllerContext::new();

        if obj.meta().deletion_timestamp.is_some() {
            let report = self.pipeline.ensure_deleted(obj, &mut ctx).await?;
            if report.keep_finalizers() {
                debug!(
                    kind = self.pipeline.kind(),
                    name = %obj.name_any(),
                    kept_by = ?report.finalizer_kept_by,
                    "keeping finalizer"
                );
            } else {
                self.remove_finalizer(obj).await?;
            }
            return Ok(report);
        }

        let obj = self.ensure_finalizer(obj).await?;
        self.pipeline.ensure_created(&obj, &mut ctx).await
    }

    fn has_finalizer(&self, obj: &K) -> bool {
        obj.finalizers().iter().any(|f| f == self.finalizer)
    }

    /// The object carrying the finalizer, written first when it lacks it
    async fn ensure_finalizer(&self, obj: &K) -> Result<K> {
        if self.has_finalizer(obj) {
            return Ok(obj.clone());
        }
        let mut updated = obj.clone();
        updated.finalizers_mut().push(self.finalizer.to_string());
        let updated = self.store.replace(&updated).await?;
        debug!(kind = self.pipeline.kind(), name = %obj.name_any(), finalizer = self.finalizer, "added finalizer");
        Ok(updated)
    }

    async fn remove_finalizer(&self, obj: &K) -> Result<()> {
        if !self.has_finalizer(obj) {
            return Ok(());
        }
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        retry_with_backoff(&RetryConfig::conflict(), "remove finalizer", || async {
            let Some(mut current) = self.store.get(&namespace, &name).await? else {
                return Ok(());
            };
            if !self.has_finalizer(&current) {
                return Ok(());
            }
            current.finalizers_mut().retain(|f| f != self.finalizer);
            self.store.replace(&current).await?;
            Ok(())
        })
        .await?;

        info!(kind = self.pipeline.kind(), %namespace, %name, "removed finalizer");
        Ok(())
    }
}
