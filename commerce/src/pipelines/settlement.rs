// commerce/src/pipelines/settlement.rs

//! The `settle_payment` step of checkout: one of three sub-pipelines records
//! the order's payment.
//!
//! - `zero_due`: nothing left to pay; the payment is settled on the spot and
//!   no gateway is called.
//! - `gateway`: the method is routed to a gateway; an intent is created and
//!   the payment waits for the gateway to confirm it.
//! - `offline`: no gateway (cash on delivery, invoice); the payment waits for
//!   an operator.

use crate::errors::{CommerceError, Result};
use crate::models::{Payment, PaymentStatus};
use crate::pipelines::contexts::{CheckoutCtxData, SettlementCtxData};
use chrono::Utc;
use orderflow::{ContextData, FlowError, Pipeline, StepControl};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub const STEP_SETTLE_PAYMENT: &str = "settle_payment";

pub fn attach_settlement_step(p: &mut Pipeline<CheckoutCtxData, CommerceError>) {
  p.branches_for_step(STEP_SETTLE_PAYMENT)
    .branch("zero_due", Arc::new(zero_due_pipeline()), settlement_ctx)
    .when(|ctx| ctx.read().amount_due_cents() == 0)
    .branch("gateway", Arc::new(gateway_pipeline()), settlement_ctx)
    .when(|ctx| {
      let guard = ctx.read();
      guard.routing.gateway_for(guard.request.method).is_some()
    })
    .branch("offline", Arc::new(offline_pipeline()), settlement_ctx)
    .when(|_| true)
    .finalize(false);

  p.before_step(STEP_SETTLE_PAYMENT, prepare_settlement);
  p.after_step(STEP_SETTLE_PAYMENT, collect_settlement);
}

fn settlement_ctx(ctx: ContextData<CheckoutCtxData>) -> Result<ContextData<SettlementCtxData>, FlowError> {
  ctx
    .read()
    .settlement
    .clone()
    .ok_or_else(|| FlowError::Internal("settlement context was not prepared".to_string()))
}

fn zero_due_pipeline() -> Pipeline<SettlementCtxData, CommerceError> {
  let mut p = Pipeline::new(&[("record_settled_payment", false, None)]).named("settlement.zero_due");
  p.on_step("record_settled_payment", record_settled_payment);
  p
}

fn gateway_pipeline() -> Pipeline<SettlementCtxData, CommerceError> {
  let mut p = Pipeline::new(&[
    ("create_intent", false, None),
    ("record_pending_payment", false, None),
  ])
  .named("settlement.gateway");
  p.on_step("create_intent", create_intent);
  p.on_step("record_pending_payment", record_pending_payment);
  p
}

fn offline_pipeline() -> Pipeline<SettlementCtxData, CommerceError> {
  let mut p = Pipeline::new(&[("record_pending_payment", false, None)]).named("settlement.offline");
  p.on_step("record_pending_payment", record_pending_payment);
  p
}

async fn prepare_settlement(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let mut guard = ctx.write();
  let customer_email = guard
    .customer_email
    .clone()
    .ok_or_else(|| CommerceError::Internal("customer email missing before settlement".to_string()))?;
  let amount_cents = guard.amount_due_cents();
  let gateway = guard.routing.gateway_for(guard.request.method);
  let settlement = SettlementCtxData {
    tx: guard.tx.clone(),
    gateways: guard.gateways.clone(),
    order_id: guard.order_id,
    amount_cents,
    method: guard.request.method,
    gateway,
    customer_email,
    intent: None,
    payment: None,
  };
  guard.settlement = Some(ContextData::new(settlement));
  Ok(StepControl::Continue)
}

async fn collect_settlement(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let settlement = settlement_ctx(ctx.clone())?;
  let (payment, client_secret) = {
    let guard = settlement.read();
    (
      guard.payment.clone(),
      guard.intent.as_ref().and_then(|intent| intent.client_secret.clone()),
    )
  };
  let payment = payment.ok_or_else(|| CommerceError::Internal("settlement recorded no payment".to_string()))?;

  let mut guard = ctx.write();
  guard.payment = Some(payment);
  guard.client_secret = client_secret;
  Ok(StepControl::Continue)
}

fn new_payment(ctx: &SettlementCtxData, status: PaymentStatus) -> Payment {
  let now = Utc::now();
  let intent = ctx.intent.as_ref();
  Payment {
    id: Uuid::new_v4(),
    order_id: ctx.order_id,
    amount_cents: ctx.amount_cents,
    method: ctx.method,
    gateway: intent.and(ctx.gateway),
    intent_id: intent.map(|i| i.intent_id.clone()),
    client_secret: intent.and_then(|i| i.client_secret.clone()),
    status,
    refund_id: None,
    created_at: now,
    updated_at: now,
  }
}

#[instrument(name = "settlement::record_settled_payment", skip_all, err(Display))]
async fn record_settled_payment(ctx: ContextData<SettlementCtxData>) -> Result<StepControl> {
  let (tx, draft) = {
    let guard = ctx.read();
    (guard.tx.clone(), new_payment(&guard, PaymentStatus::Success))
  };
  let payment = tx.lock().await.create_payment(&draft).await?;
  info!(payment_id = %payment.id, order_id = %payment.order_id, "Nothing due; payment settled without gateway.");
  ctx.write().payment = Some(payment);
  Ok(StepControl::Continue)
}

/// Runs with the transaction open: a failing gateway rolls the whole
/// checkout back.
#[instrument(name = "settlement::create_intent", skip_all, err(Display))]
async fn create_intent(ctx: ContextData<SettlementCtxData>) -> Result<StepControl> {
  let (gateways, gateway, order_id, amount_cents, email) = {
    let guard = ctx.read();
    (
      guard.gateways.clone(),
      guard.gateway,
      guard.order_id,
      guard.amount_cents,
      guard.customer_email.clone(),
    )
  };
  let gateway = gateway.ok_or_else(|| CommerceError::Internal("gateway branch without a routed gateway".to_string()))?;

  let adapter = gateways.get(gateway)?;
  let intent = adapter.create_intent(order_id, amount_cents, &email).await?;
  info!(%order_id, %gateway, intent_id = %intent.intent_id, "Payment intent created.");
  ctx.write().intent = Some(intent);
  Ok(StepControl::Continue)
}

#[instrument(name = "settlement::record_pending_payment", skip_all, err(Display))]
async fn record_pending_payment(ctx: ContextData<SettlementCtxData>) -> Result<StepControl> {
  let (tx, draft) = {
    let guard = ctx.read();
    (guard.tx.clone(), new_payment(&guard, PaymentStatus::Pending))
  };
  let payment = tx.lock().await.create_payment(&draft).await?;
  info!(
    payment_id = %payment.id,
    order_id = %payment.order_id,
    gateway = ?payment.gateway,
    "Pending payment recorded."
  );
  ctx.write().payment = Some(payment);
  Ok(StepControl::Continue)
}
