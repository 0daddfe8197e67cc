// commerce/src/pipelines/refund_pipeline.rs

//! Reverses an order whose payment was captured: refunds through the
//! gateway, then marks payment and order refunded.

use crate::errors::{CommerceError, Result};
use crate::models::{OrderStatus, PaymentStatus};
use crate::pipelines::common_steps;
use crate::pipelines::contexts::RefundCtxData;
use orderflow::{ContextData, FlowRegistry, Pipeline, SkipCondition, StepControl};
use std::sync::Arc;
use tracing::{info, instrument, warn};

fn unless_gateway_payment() -> SkipCondition<RefundCtxData> {
  Arc::new(|ctx: ContextData<RefundCtxData>| {
    ctx.read().payment.as_ref().map_or(true, |p| p.gateway.is_none())
  })
}

pub fn build_refund_pipeline() -> Pipeline<RefundCtxData, CommerceError> {
  let mut p = Pipeline::<RefundCtxData, CommerceError>::new(&[
    ("load_order", false, None),
    ("load_payment", false, None),
    ("refund_at_gateway", false, Some(unless_gateway_payment())),
    ("mark_payment_refunded", false, None),
    ("refund_order", false, None),
  ])
  .named("refund");

  p.on_step("load_order", load_order);
  p.on_step("load_payment", load_payment);
  p.on_step("refund_at_gateway", refund_at_gateway);
  p.on_step("mark_payment_refunded", mark_payment_refunded);
  p.on_step("refund_order", refund_order);
  p
}

pub fn register_refund_pipeline(registry: &FlowRegistry<CommerceError>) {
  registry.register(build_refund_pipeline());
}

async fn load_order(ctx: ContextData<RefundCtxData>) -> Result<StepControl> {
  let (tx, order_id, required) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.order_id, guard.required_status)
  };
  let order = common_steps::load_reversible_order(&tx, order_id, required, OrderStatus::Refunded).await?;
  ctx.write().order = Some(order);
  Ok(StepControl::Continue)
}

/// Only a settled payment can be refunded.
#[instrument(name = "refund::load_payment", skip_all, err(Display))]
async fn load_payment(ctx: ContextData<RefundCtxData>) -> Result<StepControl> {
  let (tx, order_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.order_id)
  };
  let payment = tx.lock().await.get_payment_by_order_id(order_id).await?;
  let payment = match payment {
    Some(p) if p.status == PaymentStatus::Success => p,
    other => {
      let status = other.map(|p| p.status);
      warn!(%order_id, ?status, "Refund refused: payment not settled.");
      return Err(CommerceError::PaymentNotSettled { order_id, status });
    }
  };
  ctx.write().payment = Some(payment);
  Ok(StepControl::Continue)
}

/// A gateway refusal fails the run, leaving order and payment untouched.
#[instrument(name = "refund::refund_at_gateway", skip_all, err(Display))]
async fn refund_at_gateway(ctx: ContextData<RefundCtxData>) -> Result<StepControl> {
  let (compensator, payment) = {
    let guard = ctx.read();
    (guard.compensator.clone(), guard.payment.clone())
  };
  let payment = payment.ok_or_else(|| CommerceError::Internal("no payment to refund".to_string()))?;
  let refund_id = compensator.refund_payment(&payment).await?;
  info!(payment_id = %payment.id, ?refund_id, "Gateway refund accepted.");
  ctx.write().refund_id = refund_id;
  Ok(StepControl::Continue)
}

async fn mark_payment_refunded(ctx: ContextData<RefundCtxData>) -> Result<StepControl> {
  let (tx, payment, refund_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.payment.clone(), guard.refund_id.clone())
  };
  let mut payment = payment.ok_or_else(|| CommerceError::Internal("no payment to refund".to_string()))?;
  payment.status = PaymentStatus::Refunded;
  // Synchronous providers return no refund id.
  payment.refund_id = refund_id.filter(|id| !id.is_empty());
  let payment = tx.lock().await.update_payment(&payment).await?;
  ctx.write().payment = Some(payment);
  Ok(StepControl::Continue)
}

async fn refund_order(ctx: ContextData<RefundCtxData>) -> Result<StepControl> {
  let (tx, order_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.order_id)
  };
  let order = tx.lock().await.update_order_status(order_id, OrderStatus::Refunded).await?;
  info!(%order_id, "Order refunded.");
  ctx.write().order = Some(order);
  Ok(StepControl::Continue)
}
