//! Ordered, cancellable reconciliation pipeline
//!
//! A [`Pipeline`] is a fixed list of [`Step`]s registered in the order they
//! run. Each step reports an [`Outcome`]; the driver folds the outcomes of one
//! pass into a [`PassReport`] that the controller uses to decide what happens
//! to the finalizer.
//!
//! - Create/update/resync passes run the steps forward and stop after the
//!   first step returning [`Outcome::Cancel`].
//! - Delete passes run the same steps. [`Outcome::KeepFinalizer`] from any of
//!   them keeps the finalizer. [`Outcome::Cancel`] stops the pass; the
//!   finalizer is still removed unless an earlier step kept it.
//! - The first error aborts the pass and is returned as is.

mod context;

pub use context::{ControllerContext, RemoteClusterHandle, ValuesRef};

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::metrics::prometheus::STEP_CANCELLATIONS;
use crate::Result;

/// What a step asks the driver to do after it returns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Run the next step
    Continue,
    /// Skip the remaining steps of this pass
    Cancel,
    /// Do not remove the finalizer at the end of this deletion pass
    KeepFinalizer,
}

/// Which side of the lifecycle a pass runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Created,
    Deleted,
}

/// One idempotent unit of reconciliation logic
#[async_trait]
pub trait Step<K>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ensure_created(&self, obj: &K, ctx: &mut ControllerContext) -> Result<Outcome>;

    async fn ensure_deleted(&self, obj: &K, ctx: &mut ControllerContext) -> Result<Outcome>;
}

/// Accumulated outcome of one pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassReport {
    pub operation: Operation,
    /// Steps that ran, in order
    pub executed: Vec<&'static str>,
    /// Step that canceled the pass
    pub canceled_by: Option<&'static str>,
    /// Steps that asked for the finalizer to stay
    pub finalizer_kept_by: Vec<&'static str>,
}

impl PassReport {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            executed: Vec::new(),
            canceled_by: None,
            finalizer_kept_by: Vec::new(),
        }
    }

    pub fn canceled(&self) -> bool {
        self.canceled_by.is_some()
    }

    pub fn keep_finalizers(&self) -> bool {
        !self.finalizer_kept_by.is_empty()
    }
}

/// Named, ordered list of steps for one resource kind
pub struct Pipeline<K> {
    kind: &'static str,
    steps: Vec<Box<dyn Step<K>>>,
}

impl<K> Pipeline<K>
where
    K: Resource + Send + Sync,
{
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            steps: Vec::new(),
        }
    }

    /// Append a step; steps run in the order they are added
    pub fn step(mut self, step: impl Step<K> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run the create/update path
    pub async fn ensure_created(&self, obj: &K, ctx: &mut ControllerContext) -> Result<PassReport> {
        self.run(Operation::Created, obj, ctx).await
    }

    /// Run the deletion path
    pub async fn ensure_deleted(&self, obj: &K, ctx: &mut ControllerContext) -> Result<PassReport> {
        self.run(Operation::Deleted, obj, ctx).await
    }

    async fn run(
        &self,
        operation: Operation,
        obj: &K,
        ctx: &mut ControllerContext,
    ) -> Result<PassReport> {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_default();
        let mut report = PassReport::new(operation);

        for step in &self.steps {
            debug!(kind = self.kind, %namespace, %name, step = step.name(), ?operation, "running step");

            let result = match operation {
                Operation::Created => step.ensure_created(obj, ctx).await,
                Operation::Deleted => step.ensure_deleted(obj, ctx).await,
            };
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(kind = self.kind, %namespace, %name, step = step.name(), ?operation, error = %e, "step failed");
                    return Err(e);
                }
            };
            report.executed.push(step.name());

            match (outcome, operation) {
                (Outcome::Continue, _) => {}
                (Outcome::Cancel, _) => {
                    info!(kind = self.kind, %namespace, %name, step = step.name(), ?operation, "pass canceled");
                    STEP_CANCELLATIONS
                        .with_label_values(&[self.kind, step.name()])
                        .inc();
                    report.canceled_by = Some(step.name());
                    break;
                }
                (Outcome::KeepFinalizer, Operation::Deleted) => {
                    debug!(kind = self.kind, %namespace, %name, step = step.name(), "keeping finalizer");
                    report.finalizer_kept_by.push(step.name());
                }
                (Outcome::KeepFinalizer, Operation::Created) => {
                    debug!(kind = self.kind, %namespace, %name, step = step.name(), "ignoring keep-finalizer outside deletion");
                }
            }
        }

        Ok(report)
    }
}
