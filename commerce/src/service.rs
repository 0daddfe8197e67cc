// commerce/src/service.rs

//! `OrderService`: the public face of the orchestration layer.
//!
//! Every operation opens one store transaction, runs its registered pipeline
//! over a context holding that transaction, and lets the engine commit or
//! roll back according to the outcome.

use crate::compensation::{GatewayCompensator, PaymentCompensator};
use crate::config::PaymentRouting;
use crate::errors::{CommerceError, Result};
use crate::gateway::GatewayRegistry;
use crate::models::{Order, OrderItem, OrderStatus, Payment, PaymentMethod, ShippingSnapshot};
use crate::pipelines::contexts::{
  AppliedDiscount, CancelCtxData, CheckoutCtxData, ReconcileCtxData, ReconcileOutcome, RefundCtxData,
  StatusSyncCtxData,
};
use crate::pipelines::register_all_pipelines;
use crate::store::Store;
use orderflow::{ContextData, FlowOutcome, FlowRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
  pub customer_id: Uuid,
  pub cart_id: Uuid,
  pub shipping: ShippingSnapshot,
  /// Applied in this order when their sum exceeds the order total.
  pub discount_ids: Vec<Uuid>,
  pub method: PaymentMethod,
}

impl CheckoutRequest {
  /// Checks that need no database; run before a transaction is opened.
  pub fn validate(&self) -> Result<()> {
    let missing = self.shipping.missing_fields();
    if !missing.is_empty() {
      return Err(CommerceError::Validation(format!(
        "missing shipping fields: {}",
        missing.join(", ")
      )));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = self.discount_ids.iter().find(|id| !seen.insert(**id)) {
      return Err(CommerceError::Validation(format!(
        "discount {} selected more than once",
        duplicate
      )));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReceipt {
  pub order: Order,
  pub items: Vec<OrderItem>,
  pub discounts: Vec<AppliedDiscount>,
  pub payment: Payment,
  /// Handed to the client to confirm a gateway payment.
  pub client_secret: Option<String>,
}

/// State of an order after a cancel or refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalReceipt {
  pub order: Order,
  pub payment: Option<Payment>,
}

pub struct OrderService {
  store: Arc<dyn Store>,
  registry: FlowRegistry<CommerceError>,
  gateways: GatewayRegistry,
  routing: PaymentRouting,
  compensator: Arc<dyn PaymentCompensator>,
}

impl OrderService {
  pub fn new(store: Arc<dyn Store>, gateways: GatewayRegistry, routing: PaymentRouting) -> Self {
    let registry = FlowRegistry::new();
    register_all_pipelines(&registry);
    let compensator: Arc<dyn PaymentCompensator> = Arc::new(GatewayCompensator::new(gateways.clone()));
    Self {
      store,
      registry,
      gateways,
      routing,
      compensator,
    }
  }

  /// Replaces the compensator used by the caller-gated helpers.
  pub fn with_compensator(mut self, compensator: Arc<dyn PaymentCompensator>) -> Self {
    self.compensator = compensator;
    self
  }

  pub fn compensator(&self) -> Arc<dyn PaymentCompensator> {
    self.compensator.clone()
  }

  pub fn gateways(&self) -> &GatewayRegistry {
    &self.gateways
  }

  /// Turns a cart into a pending order with its items, discount usage and
  /// payment. Nothing is persisted unless every step succeeds.
  #[instrument(
    name = "OrderService::checkout",
    skip_all,
    fields(customer_id = %request.customer_id, cart_id = %request.cart_id, method = %request.method),
    err(Display)
  )]
  pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
    request.validate()?;

    let tx = self.store.begin().await?;
    let ctx = ContextData::new(CheckoutCtxData::new(
      tx.clone(),
      self.gateways.clone(),
      self.routing,
      request,
    ));
    let outcome = self.registry.run_atomic(ctx.clone(), &tx).await?;
    expect_completed(outcome, "checkout")?;

    let mut guard = ctx.write();
    let order = guard
      .order
      .take()
      .ok_or_else(|| CommerceError::Internal("checkout completed without an order".to_string()))?;
    let payment = guard
      .payment
      .take()
      .ok_or_else(|| CommerceError::Internal("checkout completed without a payment".to_string()))?;
    info!(
      order_id = %order.id,
      payment_id = %payment.id,
      amount_cents = payment.amount_cents,
      status = %payment.status,
      "Checkout completed."
    );
    Ok(CheckoutReceipt {
      order,
      items: std::mem::take(&mut guard.items),
      discounts: std::mem::take(&mut guard.applied_discounts),
      payment,
      client_secret: guard.client_secret.take(),
    })
  }

  /// Cancels an order whose payment is not captured. The caller is expected
  /// to have checked that the order may be cancelled; see
  /// `cancel_pending_order`.
  #[instrument(name = "OrderService::cancel", skip(self, compensator), err(Display))]
  pub async fn cancel(&self, order_id: Uuid, compensator: Arc<dyn PaymentCompensator>) -> Result<ReversalReceipt> {
    self.run_cancel(order_id, compensator, None).await
  }

  /// Refunds an order whose payment is captured. The caller is expected to
  /// have checked that the order was fulfilled; see `refund_delivered_order`.
  #[instrument(name = "OrderService::refund", skip(self, compensator), err(Display))]
  pub async fn refund(&self, order_id: Uuid, compensator: Arc<dyn PaymentCompensator>) -> Result<ReversalReceipt> {
    self.run_refund(order_id, compensator, None).await
  }

  /// `cancel` for orders still `pending`, through the configured gateways.
  #[instrument(name = "OrderService::cancel_pending_order", skip(self), err(Display))]
  pub async fn cancel_pending_order(&self, order_id: Uuid) -> Result<ReversalReceipt> {
    self
      .run_cancel(order_id, self.compensator.clone(), Some(OrderStatus::Pending))
      .await
  }

  /// `refund` for orders that were `delivered`, through the configured gateways.
  #[instrument(name = "OrderService::refund_delivered_order", skip(self), err(Display))]
  pub async fn refund_delivered_order(&self, order_id: Uuid) -> Result<ReversalReceipt> {
    self
      .run_refund(order_id, self.compensator.clone(), Some(OrderStatus::Delivered))
      .await
  }

  /// Applies a provider event to the payment with this intent id. Replays
  /// and unknown or out-of-order events are reported, not failed.
  #[instrument(name = "OrderService::apply_gateway_event", skip(self), err(Display))]
  pub async fn apply_gateway_event(&self, intent_id: &str, event_type: &str) -> Result<ReconcileOutcome> {
    let tx = self.store.begin().await?;
    let ctx = ContextData::new(ReconcileCtxData::new(tx.clone(), intent_id, event_type));
    self.registry.run_atomic(ctx.clone(), &tx).await?;
    let outcome = ctx.read().outcome;
    outcome.ok_or_else(|| CommerceError::Internal("reconciliation finished without an outcome".to_string()))
  }

  /// Polls the gateway for the order's payment and applies what it reports.
  #[instrument(name = "OrderService::sync_payment_status", skip(self), err(Display))]
  pub async fn sync_payment_status(&self, order_id: Uuid) -> Result<ReconcileOutcome> {
    let tx = self.store.begin().await?;
    let ctx = ContextData::new(StatusSyncCtxData::new(tx.clone(), self.gateways.clone(), order_id));
    self.registry.run_atomic(ctx.clone(), &tx).await?;
    let outcome = ctx.read().outcome;
    outcome.ok_or_else(|| CommerceError::Internal("status sync finished without an outcome".to_string()))
  }

  async fn run_cancel(
    &self,
    order_id: Uuid,
    compensator: Arc<dyn PaymentCompensator>,
    required_status: Option<OrderStatus>,
  ) -> Result<ReversalReceipt> {
    let tx = self.store.begin().await?;
    let ctx = ContextData::new(CancelCtxData::new(tx.clone(), compensator, order_id, required_status));
    let outcome = self.registry.run_atomic(ctx.clone(), &tx).await?;
    expect_completed(outcome, "cancel")?;

    let mut guard = ctx.write();
    let order = guard
      .order
      .take()
      .ok_or_else(|| CommerceError::Internal("cancel completed without an order".to_string()))?;
    Ok(ReversalReceipt {
      order,
      payment: guard.payment.take(),
    })
  }

  async fn run_refund(
    &self,
    order_id: Uuid,
    compensator: Arc<dyn PaymentCompensator>,
    required_status: Option<OrderStatus>,
  ) -> Result<ReversalReceipt> {
    let tx = self.store.begin().await?;
    let ctx = ContextData::new(RefundCtxData::new(tx.clone(), compensator, order_id, required_status));
    let outcome = self.registry.run_atomic(ctx.clone(), &tx).await?;
    expect_completed(outcome, "refund")?;

    let mut guard = ctx.write();
    let order = guard
      .order
      .take()
      .ok_or_else(|| CommerceError::Internal("refund completed without an order".to_string()))?;
    Ok(ReversalReceipt {
      order,
      payment: guard.payment.take(),
    })
  }
}

fn expect_completed(outcome: FlowOutcome, operation: &str) -> Result<()> {
  if outcome.is_completed() {
    return Ok(());
  }
  Err(CommerceError::Internal(format!(
    "{} pipeline stopped before completing",
    operation
  )))
}
