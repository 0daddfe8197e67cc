// orderflow/src/branch/scope.rs

//! One conditional path of a branching step, and its type-erased form.

use crate::core::context_data::ContextData;
use crate::core::control::{FlowOutcome, StepControl};
use crate::error::FlowError;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{event, instrument, Level};

pub(crate) type Extractor<TData, SData> =
  Arc<dyn Fn(ContextData<TData>) -> Result<ContextData<SData>, FlowError> + Send + Sync + 'static>;

pub(crate) type Condition<TData> = Arc<dyn Fn(ContextData<TData>) -> bool + Send + Sync + 'static>;

/// A sub-pipeline over `SData`, the extractor that derives its context from
/// the root context, and the condition that selects it.
pub(crate) struct Branch<TData, SData, Err>
where
  TData: 'static + Send + Sync,
  SData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pub(crate) label: String,
  pub(crate) pipeline: Arc<Pipeline<SData, Err>>,
  pub(crate) extractor: Extractor<TData, SData>,
  pub(crate) condition: Condition<TData>,
}

/// Lets branches with different `SData` live in one list.
#[async_trait]
pub(crate) trait AnyBranch<TData, Err>: Send + Sync
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  fn label(&self) -> &str;

  fn matches(&self, root_ctx: ContextData<TData>) -> bool;

  /// Extracts the sub-context and runs the sub-pipeline. A completed
  /// sub-run continues the parent step; a stopped one stops the parent run.
  async fn execute(&self, step_name: &str, root_ctx: ContextData<TData>) -> Result<StepControl, Err>;
}

#[async_trait]
impl<TData, SData, Err> AnyBranch<TData, Err> for Branch<TData, SData, Err>
where
  TData: 'static + Send + Sync,
  SData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  fn label(&self) -> &str {
    &self.label
  }

  fn matches(&self, root_ctx: ContextData<TData>) -> bool {
    (self.condition)(root_ctx)
  }

  #[instrument(
    name = "Branch::execute",
    skip(self, root_ctx),
    fields(branch = %self.label, sub_context = %std::any::type_name::<SData>()),
    err(Display)
  )]
  async fn execute(&self, step_name: &str, root_ctx: ContextData<TData>) -> Result<StepControl, Err> {
    let sub_ctx = (self.extractor)(root_ctx).map_err(|e| {
      event!(Level::ERROR, error = %e, "Branch extractor failed.");
      let source = match e {
        FlowError::ExtractorFailure { source, .. } | FlowError::HandlerError { source } => source,
        other => anyhow::Error::new(other),
      };
      Err::from(FlowError::ExtractorFailure {
        step_name: step_name.to_string(),
        source,
      })
    })?;

    match self.pipeline.run(sub_ctx).await? {
      FlowOutcome::Completed => Ok(StepControl::Continue),
      FlowOutcome::Stopped => {
        event!(Level::INFO, "Branch pipeline stopped; stopping parent run.");
        Ok(StepControl::Stop)
      }
    }
  }
}
