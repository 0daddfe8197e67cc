// commerce/src/pipelines/webhook_pipeline.rs

//! Applies an asynchronous gateway event to the payment it refers to.
//!
//! Only the payment row changes. Order status stays with the explicit
//! orchestrators so a late or duplicated event cannot move an order an
//! operator is handling.

use crate::errors::{CommerceError, Result};
use crate::models::PaymentStatus;
use crate::pipelines::common_steps;
use crate::pipelines::contexts::{ReconcileCtxData, ReconcileOutcome};
use orderflow::{ContextData, FlowRegistry, Pipeline, StepControl};
use tracing::{info, instrument, warn};

/// Local status for a provider event type. Both the bare form and the
/// `payment_intent.` prefixed form are accepted.
pub fn map_gateway_event(event_type: &str) -> Option<PaymentStatus> {
  let event = event_type.trim();
  let event = event.strip_prefix("payment_intent.").unwrap_or(event);
  match event {
    "succeeded" => Some(PaymentStatus::Success),
    "canceled" => Some(PaymentStatus::Cancelled),
    "payment_failed" => Some(PaymentStatus::Failed),
    "processing" => Some(PaymentStatus::Processing),
    _ => None,
  }
}

pub fn build_reconcile_pipeline() -> Pipeline<ReconcileCtxData, CommerceError> {
  let mut p = Pipeline::<ReconcileCtxData, CommerceError>::new(&[
    ("load_payment", false, None),
    ("map_event", false, None),
    ("apply_status", false, None),
  ])
  .named("reconcile_gateway_event");

  p.on_step("load_payment", load_payment);
  p.on_step("map_event", map_event);
  p.on_step("apply_status", apply_status);
  p
}

pub fn register_webhook_pipeline(registry: &FlowRegistry<CommerceError>) {
  registry.register(build_reconcile_pipeline());
}

#[instrument(name = "webhook::load_payment", skip_all, err(Display))]
async fn load_payment(ctx: ContextData<ReconcileCtxData>) -> Result<StepControl> {
  let (tx, intent_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.intent_id.clone())
  };
  let payment = tx
    .lock()
    .await
    .get_payment_by_intent_id(&intent_id)
    .await?
    .ok_or_else(|| CommerceError::not_found("payment", &intent_id))?;
  ctx.write().payment = Some(payment);
  Ok(StepControl::Continue)
}

async fn map_event(ctx: ContextData<ReconcileCtxData>) -> Result<StepControl> {
  let mut guard = ctx.write();
  match map_gateway_event(&guard.event_type) {
    Some(target) => {
      guard.target = Some(target);
      Ok(StepControl::Continue)
    }
    None => {
      warn!(event_type = %guard.event_type, intent_id = %guard.intent_id, "Unhandled gateway event type; ignoring.");
      guard.outcome = Some(ReconcileOutcome::Ignored);
      Ok(StepControl::Stop)
    }
  }
}

/// Stops the run unless the status actually changed, so nothing is
/// committed for replays and refused transitions.
async fn apply_status(ctx: ContextData<ReconcileCtxData>) -> Result<StepControl> {
  let (tx, payment, target) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.payment.clone(), guard.target)
  };
  let (payment, target) = payment
    .zip(target)
    .ok_or_else(|| CommerceError::Internal("reconciliation state incomplete".to_string()))?;

  let outcome = common_steps::apply_payment_status(&tx, &payment, target).await?;
  info!(intent_id = ?payment.intent_id, ?outcome, "Gateway event reconciled.");
  ctx.write().outcome = Some(outcome);
  Ok(match outcome {
    ReconcileOutcome::Applied { .. } => StepControl::Continue,
    _ => StepControl::Stop,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn event_types_map_to_payment_statuses() {
    assert_eq!(map_gateway_event("succeeded"), Some(PaymentStatus::Success));
    assert_eq!(map_gateway_event("payment_intent.succeeded"), Some(PaymentStatus::Success));
    assert_eq!(map_gateway_event("canceled"), Some(PaymentStatus::Cancelled));
    assert_eq!(map_gateway_event("payment_intent.payment_failed"), Some(PaymentStatus::Failed));
    assert_eq!(map_gateway_event("processing"), Some(PaymentStatus::Processing));
    assert_eq!(map_gateway_event("charge.refunded"), None);
    assert_eq!(map_gateway_event(""), None);
  }
}
