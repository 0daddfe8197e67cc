// commerce/src/pipelines/cancel_pipeline.rs

//! Reverses an order whose payment has not been captured: voids the gateway
//! intent, cancels payment and order, and puts the reserved stock back.

use crate::errors::{CommerceError, Result};
use crate::models::{OrderStatus, PaymentStatus};
use crate::pipelines::common_steps;
use crate::pipelines::contexts::CancelCtxData;
use orderflow::{ContextData, FlowRegistry, Pipeline, SkipCondition, StepControl};
use std::sync::Arc;
use tracing::{event, info, instrument, warn, Level};

fn unless_open_gateway_payment() -> SkipCondition<CancelCtxData> {
  Arc::new(|ctx: ContextData<CancelCtxData>| {
    let guard = ctx.read();
    !(guard.has_open_payment() && guard.payment.as_ref().is_some_and(|p| p.gateway.is_some()))
  })
}

fn unless_open_payment() -> SkipCondition<CancelCtxData> {
  Arc::new(|ctx: ContextData<CancelCtxData>| !ctx.read().has_open_payment())
}

pub fn build_cancel_pipeline() -> Pipeline<CancelCtxData, CommerceError> {
  let mut p = Pipeline::<CancelCtxData, CommerceError>::new(&[
    ("load_order", false, None),
    ("load_payment", false, None),
    ("cancel_at_gateway", false, Some(unless_open_gateway_payment())),
    ("mark_payment_cancelled", false, Some(unless_open_payment())),
    ("cancel_order", false, None),
    ("restore_stock", false, None),
  ])
  .named("cancel");

  p.on_step("load_order", load_order);
  p.on_step("load_payment", load_payment);
  p.on_step("cancel_at_gateway", cancel_at_gateway);
  p.on_step("mark_payment_cancelled", mark_payment_cancelled);
  p.on_step("cancel_order", cancel_order);
  p.on_step("restore_stock", restore_stock);
  p
}

pub fn register_cancel_pipeline(registry: &FlowRegistry<CommerceError>) {
  registry.register(build_cancel_pipeline());
}

async fn load_order(ctx: ContextData<CancelCtxData>) -> Result<StepControl> {
  let (tx, order_id, required) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.order_id, guard.required_status)
  };
  let order = common_steps::load_reversible_order(&tx, order_id, required, OrderStatus::Cancelled).await?;
  ctx.write().order = Some(order);
  Ok(StepControl::Continue)
}

/// Captured money must leave through a refund, so a captured payment stops
/// the cancellation before anything is written.
#[instrument(name = "cancel::load_payment", skip_all, err(Display))]
async fn load_payment(ctx: ContextData<CancelCtxData>) -> Result<StepControl> {
  let (tx, order_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.order_id)
  };
  let payment = tx.lock().await.get_payment_by_order_id(order_id).await?;
  match &payment {
    Some(p) if p.status.is_captured() => {
      warn!(payment_id = %p.id, status = %p.status, "Cancel refused: payment already captured.");
      return Err(CommerceError::PaymentAlreadyCaptured {
        payment_id: p.id,
        status: p.status,
      });
    }
    Some(p) => event!(Level::DEBUG, payment_id = %p.id, status = %p.status, "Payment loaded."),
    None => event!(Level::DEBUG, %order_id, "Order has no payment; nothing to void."),
  }
  ctx.write().payment = payment;
  Ok(StepControl::Continue)
}

/// A gateway refusal fails the run, leaving order and payment untouched.
#[instrument(name = "cancel::cancel_at_gateway", skip_all, err(Display))]
async fn cancel_at_gateway(ctx: ContextData<CancelCtxData>) -> Result<StepControl> {
  let (compensator, payment) = {
    let guard = ctx.read();
    (guard.compensator.clone(), guard.payment.clone())
  };
  let payment = payment.ok_or_else(|| CommerceError::Internal("no payment to cancel".to_string()))?;
  compensator.cancel_payment(&payment).await?;
  info!(payment_id = %payment.id, gateway = ?payment.gateway, "Gateway authorization voided.");
  Ok(StepControl::Continue)
}

async fn mark_payment_cancelled(ctx: ContextData<CancelCtxData>) -> Result<StepControl> {
  let (tx, payment) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.payment.clone())
  };
  let mut payment = payment.ok_or_else(|| CommerceError::Internal("no payment to cancel".to_string()))?;
  payment.status = PaymentStatus::Cancelled;
  let payment = tx.lock().await.update_payment(&payment).await?;
  ctx.write().payment = Some(payment);
  Ok(StepControl::Continue)
}

/// Discount usage of the order is left in place and keeps counting against
/// the discount's limits.
async fn cancel_order(ctx: ContextData<CancelCtxData>) -> Result<StepControl> {
  let (tx, order_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.order_id)
  };
  let order = tx.lock().await.update_order_status(order_id, OrderStatus::Cancelled).await?;
  info!(%order_id, "Order cancelled.");
  ctx.write().order = Some(order);
  Ok(StepControl::Continue)
}

/// Gives back what checkout reserved, one adjustment per variant.
#[instrument(name = "cancel::restore_stock", skip_all, err(Display))]
async fn restore_stock(ctx: ContextData<CancelCtxData>) -> Result<StepControl> {
  let (tx, order_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.order_id)
  };

  let mut store = tx.lock().await;
  let items = store.list_order_items(order_id).await?;
  let mut restored_units: i64 = 0;
  for (variant_id, quantity) in common_steps::units_per_variant(&items)? {
    let stock = store.adjust_variant_stock(variant_id, quantity).await?;
    restored_units += i64::from(quantity);
    event!(Level::DEBUG, %variant_id, quantity, stock, "Stock restored.");
  }
  drop(store);

  info!(%order_id, restored_units, "Reserved stock returned.");
  Ok(StepControl::Continue)
}
