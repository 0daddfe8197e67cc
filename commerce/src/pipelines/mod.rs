// commerce/src/pipelines/mod.rs

//! Orchestration pipelines. Each public operation of `OrderService` is one
//! registered pipeline, keyed by its context type.

use crate::errors::CommerceError;
use orderflow::FlowRegistry;

pub mod contexts;
pub mod common_steps;
pub mod settlement;

pub mod checkout_pipeline;
pub mod cancel_pipeline;
pub mod refund_pipeline;
pub mod webhook_pipeline;
pub mod status_sync_pipeline;

pub use contexts::ReconcileOutcome;
pub use webhook_pipeline::map_gateway_event;

/// Registers every orchestration pipeline. Called once when the service is
/// built.
pub fn register_all_pipelines(registry: &FlowRegistry<CommerceError>) {
  tracing::info!("Registering orchestration pipelines...");

  checkout_pipeline::register_checkout_pipeline(registry);
  cancel_pipeline::register_cancel_pipeline(registry);
  refund_pipeline::register_refund_pipeline(registry);
  webhook_pipeline::register_webhook_pipeline(registry);
  status_sync_pipeline::register_status_sync_pipeline(registry);

  tracing::info!("All orchestration pipelines registered.");
}
