// orderflow/src/branch/builder.rs

//! Fluent API for a step that dispatches to one of several sub-pipelines.
//!
//! ```ignore
//! pipeline
//!   .branches_for_step("settle")
//!   .branch("free", free_pipeline, |ctx| Ok(ctx.read().free.clone()))
//!   .when(|ctx| ctx.read().amount == 0)
//!   .branch("paid", paid_pipeline, |ctx| Ok(ctx.read().paid.clone()))
//!   .when(|_| true)
//!   .otherwise(StepControl::Stop)
//!   .finalize(false);
//! ```

use crate::branch::scope::{AnyBranch, Branch};
use crate::core::context_data::ContextData;
use crate::core::control::StepControl;
use crate::core::handler::Handler;
use crate::error::FlowError;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tracing::{event, Level};

/// Collects the branches of one step. Branches are tried in declaration
/// order and the first whose condition holds is executed.
pub struct BranchBuilder<'pipeline, TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pipeline: &'pipeline mut Pipeline<TData, Err>,
  step_name: String,
  branches: Vec<Arc<dyn AnyBranch<TData, Err>>>,
  on_no_match: Option<StepControl>,
}

impl<'pipeline, TData, Err> BranchBuilder<'pipeline, TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pub(crate) fn new(pipeline: &'pipeline mut Pipeline<TData, Err>, step_name: String) -> Self {
    Self {
      pipeline,
      step_name,
      branches: Vec::new(),
      on_no_match: None,
    }
  }

  /// Declares a branch running `sub_pipeline` over the context returned by
  /// `extractor`. Must be followed by `.when(...)`.
  pub fn branch<SData>(
    self,
    label: impl Into<String>,
    sub_pipeline: Arc<Pipeline<SData, Err>>,
    extractor: impl Fn(ContextData<TData>) -> Result<ContextData<SData>, FlowError> + Send + Sync + 'static,
  ) -> PendingBranch<'pipeline, TData, SData, Err>
  where
    SData: 'static + Send + Sync,
  {
    PendingBranch {
      builder: self,
      label: label.into(),
      sub_pipeline,
      extractor: Arc::new(extractor),
    }
  }

  /// What the step returns when no condition matches. Without this, an
  /// unmatched step fails with `FlowError::NoBranchMatched`.
  pub fn otherwise(mut self, control: StepControl) -> Self {
    self.on_no_match = Some(control);
    self
  }

  /// Installs the dispatching handler as the step's only `on` handler.
  /// When `optional` is true a failing branch is logged and the parent run
  /// continues.
  pub fn finalize(self, optional: bool) {
    let branches = Arc::new(self.branches);
    let step_name = self.step_name.clone();
    let on_no_match = self.on_no_match;

    let dispatcher: Handler<TData, Err> = Box::new(move |root_ctx: ContextData<TData>| {
      let branches = branches.clone();
      let step_name = step_name.clone();
      Box::pin(async move {
        for candidate in branches.iter() {
          if !candidate.matches(root_ctx.clone()) {
            continue;
          }
          event!(Level::DEBUG, step_name = %step_name, branch = candidate.label(), "Branch selected.");
          return match candidate.execute(&step_name, root_ctx.clone()).await {
            Ok(control) => Ok(control),
            Err(e) if optional => {
              event!(Level::WARN, step_name = %step_name, error = %e, "Optional branch failed; continuing.");
              Ok(StepControl::Continue)
            }
            Err(e) => Err(e),
          };
        }
        match on_no_match {
          Some(control) => {
            event!(Level::DEBUG, step_name = %step_name, ?control, "No branch matched.");
            Ok(control)
          }
          None => Err(Err::from(FlowError::NoBranchMatched { step_name })),
        }
      })
    });

    let idx = self.pipeline.ensure_step_exists(&self.step_name);
    self.pipeline.steps[idx].optional = optional;
    self.pipeline.on.insert(self.step_name.clone(), vec![dispatcher]);
    event!(Level::DEBUG, step_name = %self.step_name, "Branching step finalized.");
  }
}

/// A branch waiting for its condition.
pub struct PendingBranch<'pipeline, TData, SData, Err>
where
  TData: 'static + Send + Sync,
  SData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  builder: BranchBuilder<'pipeline, TData, Err>,
  label: String,
  sub_pipeline: Arc<Pipeline<SData, Err>>,
  extractor: Arc<dyn Fn(ContextData<TData>) -> Result<ContextData<SData>, FlowError> + Send + Sync + 'static>,
}

impl<'pipeline, TData, SData, Err> PendingBranch<'pipeline, TData, SData, Err>
where
  TData: 'static + Send + Sync,
  SData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pub fn when(
    self,
    condition: impl Fn(ContextData<TData>) -> bool + Send + Sync + 'static,
  ) -> BranchBuilder<'pipeline, TData, Err> {
    let PendingBranch {
      mut builder,
      label,
      sub_pipeline,
      extractor,
    } = self;
    builder.branches.push(Arc::new(Branch {
      label,
      pipeline: sub_pipeline,
      extractor,
      condition: Arc::new(condition),
    }));
    builder
  }
}
