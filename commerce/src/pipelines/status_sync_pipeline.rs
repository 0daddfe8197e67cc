// commerce/src/pipelines/status_sync_pipeline.rs

//! Asks the gateway for the current state of an order's payment intent and
//! applies it the same way a webhook would.

use crate::errors::{CommerceError, Result};
use crate::pipelines::common_steps;
use crate::pipelines::contexts::{ReconcileOutcome, StatusSyncCtxData};
use orderflow::{ContextData, FlowRegistry, Pipeline, StepControl};
use tracing::{event, info, instrument, Level};

pub fn build_status_sync_pipeline() -> Pipeline<StatusSyncCtxData, CommerceError> {
  let mut p = Pipeline::<StatusSyncCtxData, CommerceError>::new(&[
    ("load_payment", false, None),
    ("query_gateway", false, None),
    ("apply_status", false, None),
  ])
  .named("sync_payment_status");

  p.on_step("load_payment", load_payment);
  p.on_step("query_gateway", query_gateway);
  p.on_step("apply_status", apply_status);
  p
}

pub fn register_status_sync_pipeline(registry: &FlowRegistry<CommerceError>) {
  registry.register(build_status_sync_pipeline());
}

async fn load_payment(ctx: ContextData<StatusSyncCtxData>) -> Result<StepControl> {
  let (tx, order_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.order_id)
  };
  let payment = tx
    .lock()
    .await
    .get_payment_by_order_id(order_id)
    .await?
    .ok_or_else(|| CommerceError::not_found("payment", order_id))?;
  ctx.write().payment = Some(payment);
  Ok(StepControl::Continue)
}

/// Offline payments and intents still waiting on the customer leave
/// nothing to apply.
#[instrument(name = "status_sync::query_gateway", skip_all, err(Display))]
async fn query_gateway(ctx: ContextData<StatusSyncCtxData>) -> Result<StepControl> {
  let (gateways, payment) = {
    let guard = ctx.read();
    (guard.gateways.clone(), guard.payment.clone())
  };
  let payment = payment.ok_or_else(|| CommerceError::Internal("payment not loaded".to_string()))?;

  let (gateway, intent_id) = match (payment.gateway, payment.intent_id.as_deref()) {
    (Some(gateway), Some(intent_id)) => (gateway, intent_id),
    _ => {
      event!(Level::DEBUG, payment_id = %payment.id, "Payment has no gateway intent.");
      ctx.write().outcome = Some(ReconcileOutcome::Unchanged(payment.status));
      return Ok(StepControl::Stop);
    }
  };

  let status = gateways.get(gateway)?.get_status(intent_id).await?;
  info!(%gateway, intent_id, ?status, "Gateway status fetched.");
  let mut guard = ctx.write();
  guard.gateway_status = Some(status);
  if status.to_local().is_none() {
    guard.outcome = Some(ReconcileOutcome::Unchanged(payment.status));
    return Ok(StepControl::Stop);
  }
  Ok(StepControl::Continue)
}

async fn apply_status(ctx: ContextData<StatusSyncCtxData>) -> Result<StepControl> {
  let (tx, payment, target) = {
    let guard = ctx.read();
    (
      guard.tx.clone(),
      guard.payment.clone(),
      guard.gateway_status.and_then(|s| s.to_local()),
    )
  };
  let (payment, target) = payment
    .zip(target)
    .ok_or_else(|| CommerceError::Internal("status sync state incomplete".to_string()))?;

  let outcome = common_steps::apply_payment_status(&tx, &payment, target).await?;
  ctx.write().outcome = Some(outcome);
  Ok(match outcome {
    ReconcileOutcome::Applied { .. } => StepControl::Continue,
    _ => StepControl::Stop,
  })
}
