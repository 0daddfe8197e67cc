// orderflow/src/registry.rs

//! `FlowRegistry<E>`: pipelines keyed by their context type.
//!
//! A caller builds a `ContextData<TData>` and hands it to the registry, which
//! finds the pipeline registered for `TData`. Each context type therefore
//! names exactly one workflow.

use crate::core::context_data::ContextData;
use crate::core::control::FlowOutcome;
use crate::error::FlowError;
use crate::pipeline::Pipeline;
use crate::transaction::{finish_transaction, TransactionBoundary};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{event, instrument, Level};

#[async_trait]
trait ErasedRunner<AppErr>: Send + Sync
where
  AppErr: std::error::Error + Send + Sync + 'static,
{
  fn pipeline_name(&self) -> &str;

  /// `ctx` must hold a `ContextData<TData>` for the wrapped pipeline's `TData`.
  async fn run_erased(&self, ctx: Box<dyn Any + Send>) -> Result<FlowOutcome, AppErr>;
}

struct TypedRunner<TData, PipeErr, AppErr>
where
  TData: 'static + Send + Sync,
  PipeErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
  AppErr: std::error::Error + From<PipeErr> + From<FlowError> + Send + Sync + 'static,
{
  pipeline: Arc<Pipeline<TData, PipeErr>>,
  _phantom_app_err: PhantomData<fn() -> AppErr>,
}

#[async_trait]
impl<TData, PipeErr, AppErr> ErasedRunner<AppErr> for TypedRunner<TData, PipeErr, AppErr>
where
  TData: 'static + Send + Sync,
  PipeErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
  AppErr: std::error::Error + From<PipeErr> + From<FlowError> + Send + Sync + 'static,
{
  fn pipeline_name(&self) -> &str {
    self.pipeline.name()
  }

  async fn run_erased(&self, ctx: Box<dyn Any + Send>) -> Result<FlowOutcome, AppErr> {
    let typed = ctx.downcast::<ContextData<TData>>().map_err(|_| {
      let expected_type = std::any::type_name::<ContextData<TData>>().to_string();
      event!(Level::ERROR, %expected_type, "Context type mismatch in registry dispatch.");
      AppErr::from(FlowError::TypeMismatch { expected_type })
    })?;
    self.pipeline.run(*typed).await.map_err(AppErr::from)
  }
}

/// Registry of pipelines, returning `AppErr` from every run.
pub struct FlowRegistry<AppErr = FlowError>
where
  AppErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  runners: RwLock<HashMap<TypeId, Arc<dyn ErasedRunner<AppErr>>>>,
}

impl<AppErr> Default for FlowRegistry<AppErr>
where
  AppErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<AppErr> FlowRegistry<AppErr>
where
  AppErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      runners: RwLock::new(HashMap::new()),
    }
  }

  /// Registers `pipeline` for its context type, replacing any earlier one.
  pub fn register<TData, PipeErr>(&self, pipeline: Pipeline<TData, PipeErr>)
  where
    TData: 'static + Send + Sync,
    PipeErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
    AppErr: From<PipeErr>,
  {
    event!(Level::DEBUG, pipeline = %pipeline.name(), "Registering pipeline.");
    let runner = TypedRunner::<TData, PipeErr, AppErr> {
      pipeline: Arc::new(pipeline),
      _phantom_app_err: PhantomData,
    };
    if let Some(previous) = self.runners.write().insert(TypeId::of::<TData>(), Arc::new(runner)) {
      event!(Level::WARN, replaced = %previous.pipeline_name(), "Pipeline registration replaced an existing one.");
    }
  }

  pub fn is_registered<TData: 'static + Send + Sync>(&self) -> bool {
    self.runners.read().contains_key(&TypeId::of::<TData>())
  }

  /// Runs the pipeline registered for `TData`.
  #[instrument(name = "FlowRegistry::run", skip_all, fields(context = %std::any::type_name::<TData>()))]
  pub async fn run<TData>(&self, ctx_data: ContextData<TData>) -> Result<FlowOutcome, AppErr>
  where
    TData: 'static + Send + Sync,
  {
    let runner = self.runners.read().get(&TypeId::of::<TData>()).cloned().ok_or_else(|| {
      let context_type = std::any::type_name::<TData>().to_string();
      event!(Level::ERROR, %context_type, "No pipeline registered.");
      AppErr::from(FlowError::NotRegistered { context_type })
    })?;
    runner.run_erased(Box::new(ctx_data)).await
  }

  /// Runs the pipeline registered for `TData`, then commits or rolls back
  /// `boundary` the same way `Pipeline::run_atomic` does.
  pub async fn run_atomic<TData, B>(&self, ctx_data: ContextData<TData>, boundary: &B) -> Result<FlowOutcome, AppErr>
  where
    TData: 'static + Send + Sync,
    B: TransactionBoundary + ?Sized,
    AppErr: From<B::Error>,
  {
    let result = self.run(ctx_data).await;
    finish_transaction(result, boundary).await
  }
}
