// orderflow/src/pipeline/execution.rs

//! `Pipeline::run` and `Pipeline::run_atomic`.

use crate::core::context_data::ContextData;
use crate::core::control::{FlowOutcome, StepControl};
use crate::core::handler::Handler;
use crate::error::FlowError;
use crate::pipeline::definition::Pipeline;
use crate::transaction::{finish_transaction, TransactionBoundary};
use tracing::{event, info_span, instrument, Instrument, Level};

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Runs every step in declaration order against `ctx_data`.
  ///
  /// Skip conditions are evaluated right before their step. A step whose
  /// phases are all empty fails the run with `FlowError::HandlerMissing`
  /// unless it is optional. The first error or `Stop` ends the run.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(pipeline = %self.name, num_steps = self.steps.len()),
    err(Display)
  )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<FlowOutcome, Err> {
    event!(Level::DEBUG, "Pipeline run starting.");

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();
      let step_span = info_span!("pipeline_step", step_name, step_index = step_idx, optional = step_def.optional);

      if let Some(skip_if) = &step_def.skip_if {
        if skip_if(ctx_data.clone()) {
          step_span.in_scope(|| event!(Level::DEBUG, "Step skipped by its skip condition."));
          continue;
        }
      }

      let phases = [
        ("before", self.before.get(step_name)),
        ("on", self.on.get(step_name)),
        ("after", self.after.get(step_name)),
      ];
      let has_handlers = phases.iter().any(|(_, hs)| hs.map_or(false, |v| !v.is_empty()));

      if !has_handlers {
        if step_def.optional {
          step_span.in_scope(|| event!(Level::DEBUG, "Optional step has no handlers, skipping."));
          continue;
        }
        step_span.in_scope(|| event!(Level::ERROR, "Non-optional step has no handlers."));
        return Err(Err::from(FlowError::HandlerMissing {
          step_name: step_def.name.clone(),
        }));
      }

      for (phase, handlers) in phases {
        let Some(handlers) = handlers else { continue };
        match run_phase(phase, handlers, &ctx_data).instrument(step_span.clone()).await? {
          StepControl::Continue => {}
          StepControl::Stop => {
            step_span.in_scope(|| event!(Level::INFO, phase, "Pipeline stopped by a handler."));
            return Ok(FlowOutcome::Stopped);
          }
        }
      }
      step_span.in_scope(|| event!(Level::DEBUG, "Step finished."));
    }

    event!(Level::DEBUG, "Pipeline run completed.");
    Ok(FlowOutcome::Completed)
  }

  /// Runs the pipeline, then commits `boundary` if the run completed and rolls
  /// it back if the run stopped or failed. Nothing a stopped or failed run
  /// wrote through the boundary survives.
  pub async fn run_atomic<B>(&self, ctx_data: ContextData<TData>, boundary: &B) -> Result<FlowOutcome, Err>
  where
    B: TransactionBoundary + ?Sized,
    Err: From<B::Error>,
  {
    let result = self.run(ctx_data).await;
    finish_transaction(result, boundary).await
  }
}

async fn run_phase<TData, Err>(
  phase: &'static str,
  handlers: &[Handler<TData, Err>],
  ctx_data: &ContextData<TData>,
) -> Result<StepControl, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + Send + Sync + 'static,
{
  for (handler_idx, handler_fn) in handlers.iter().enumerate() {
    match handler_fn(ctx_data.clone()).await {
      Ok(StepControl::Continue) => {}
      Ok(StepControl::Stop) => return Ok(StepControl::Stop),
      Err(e) => {
        event!(Level::ERROR, phase, handler_index = handler_idx, error = %e, "Handler failed.");
        return Err(e);
      }
    }
  }
  Ok(StepControl::Continue)
}
