// commerce/src/pipelines/contexts.rs

//! Underlying data of every orchestration pipeline. Handlers receive these
//! wrapped in `orderflow::ContextData`.
//!
//! Each context carries the `TxHandle` of its run; every row operation of
//! the run goes through it.

use crate::compensation::PaymentCompensator;
use crate::config::PaymentRouting;
use crate::gateway::{GatewayPaymentStatus, GatewayRegistry, IntentHandle};
use crate::models::{CartItem, Gateway, Order, OrderItem, OrderStatus, Payment, PaymentMethod, PaymentStatus};
use crate::service::CheckoutRequest;
use crate::store::TxHandle;
use orderflow::ContextData;
use std::sync::Arc;
use uuid::Uuid;

// --- Checkout ---

/// A discount granted to the order, after clamping to the order total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedDiscount {
  pub discount_id: Uuid,
  pub amount_cents: i64,
}

pub struct CheckoutCtxData {
  pub tx: TxHandle,
  pub gateways: GatewayRegistry,
  pub routing: PaymentRouting,

  pub request: CheckoutRequest,

  /// Generated up front so item and usage rows can reference it.
  pub order_id: Uuid,
  pub customer_email: Option<String>,
  pub cart_items: Vec<CartItem>,
  pub items: Vec<OrderItem>,
  pub total_cents: i64,
  pub applied_discounts: Vec<AppliedDiscount>,
  pub discount_cents: i64,
  pub order: Option<Order>,
  pub settlement: Option<ContextData<SettlementCtxData>>,
  pub payment: Option<Payment>,
  pub client_secret: Option<String>,
}

impl CheckoutCtxData {
  pub fn new(tx: TxHandle, gateways: GatewayRegistry, routing: PaymentRouting, request: CheckoutRequest) -> Self {
    Self {
      tx,
      gateways,
      routing,
      request,
      order_id: Uuid::new_v4(),
      customer_email: None,
      cart_items: Vec::new(),
      items: Vec::new(),
      total_cents: 0,
      applied_discounts: Vec::new(),
      discount_cents: 0,
      order: None,
      settlement: None,
      payment: None,
      client_secret: None,
    }
  }

  pub fn amount_due_cents(&self) -> i64 {
    (self.total_cents - self.discount_cents).max(0)
  }
}

/// Sub-context of the `settle_payment` step. Exactly one settlement branch
/// runs over it.
pub struct SettlementCtxData {
  pub tx: TxHandle,
  pub gateways: GatewayRegistry,
  pub order_id: Uuid,
  pub amount_cents: i64,
  pub method: PaymentMethod,
  /// Gateway routed for `method`; `None` settles offline.
  pub gateway: Option<Gateway>,
  pub customer_email: String,

  pub intent: Option<IntentHandle>,
  pub payment: Option<Payment>,
}

// --- Cancel / refund ---

pub struct CancelCtxData {
  pub tx: TxHandle,
  pub compensator: Arc<dyn PaymentCompensator>,
  pub order_id: Uuid,
  /// Order status the caller requires before cancelling.
  pub required_status: Option<OrderStatus>,

  pub order: Option<Order>,
  pub payment: Option<Payment>,
}

impl CancelCtxData {
  pub fn new(
    tx: TxHandle,
    compensator: Arc<dyn PaymentCompensator>,
    order_id: Uuid,
    required_status: Option<OrderStatus>,
  ) -> Self {
    Self {
      tx,
      compensator,
      order_id,
      required_status,
      order: None,
      payment: None,
    }
  }

  /// True when the run still has an uncaptured payment to void.
  pub fn has_open_payment(&self) -> bool {
    self
      .payment
      .as_ref()
      .is_some_and(|p| matches!(p.status, PaymentStatus::Pending | PaymentStatus::Processing))
  }
}

pub struct RefundCtxData {
  pub tx: TxHandle,
  pub compensator: Arc<dyn PaymentCompensator>,
  pub order_id: Uuid,
  pub required_status: Option<OrderStatus>,

  pub order: Option<Order>,
  pub payment: Option<Payment>,
  pub refund_id: Option<String>,
}

impl RefundCtxData {
  pub fn new(
    tx: TxHandle,
    compensator: Arc<dyn PaymentCompensator>,
    order_id: Uuid,
    required_status: Option<OrderStatus>,
  ) -> Self {
    Self {
      tx,
      compensator,
      order_id,
      required_status,
      order: None,
      payment: None,
      refund_id: None,
    }
  }
}

// --- Reconciliation ---

/// What a reconciliation did to the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
  /// The payment moved to the mapped status.
  Applied { from: PaymentStatus, to: PaymentStatus },
  /// The payment already had the mapped status.
  Unchanged(PaymentStatus),
  /// Unknown event type, or a transition the payment state machine forbids.
  Ignored,
}

pub struct ReconcileCtxData {
  pub tx: TxHandle,
  pub intent_id: String,
  pub event_type: String,

  pub payment: Option<Payment>,
  pub target: Option<PaymentStatus>,
  pub outcome: Option<ReconcileOutcome>,
}

impl ReconcileCtxData {
  pub fn new(tx: TxHandle, intent_id: impl Into<String>, event_type: impl Into<String>) -> Self {
    Self {
      tx,
      intent_id: intent_id.into(),
      event_type: event_type.into(),
      payment: None,
      target: None,
      outcome: None,
    }
  }
}

/// Pulls a payment's status from its gateway instead of waiting for a
/// webhook.
pub struct StatusSyncCtxData {
  pub tx: TxHandle,
  pub gateways: GatewayRegistry,
  pub order_id: Uuid,

  pub payment: Option<Payment>,
  pub gateway_status: Option<GatewayPaymentStatus>,
  pub outcome: Option<ReconcileOutcome>,
}

impl StatusSyncCtxData {
  pub fn new(tx: TxHandle, gateways: GatewayRegistry, order_id: Uuid) -> Self {
    Self {
      tx,
      gateways,
      order_id,
      payment: None,
      gateway_status: None,
      outcome: None,
    }
  }
}
