// orderflow/src/core/handler.rs

//! The boxed handler type stored by pipelines.

use crate::core::context_data::ContextData;
use crate::core::control::StepControl;
use std::future::Future;
use std::pin::Pin;

/// Boxed future produced by a handler.
pub type HandlerFuture<Err> = Pin<Box<dyn Future<Output = Result<StepControl, Err>> + Send>>;

/// A step handler: receives a clone of the run's `ContextData<TData>` and
/// resolves to a `StepControl` or the pipeline's error type.
///
/// Handlers copy what they need out of the context, drop the guard, then
/// await. Holding a guard across an await point can deadlock the run.
pub type Handler<TData, Err> = Box<dyn Fn(ContextData<TData>) -> HandlerFuture<Err> + Send + Sync>;
