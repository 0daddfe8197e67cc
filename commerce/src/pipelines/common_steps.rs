// commerce/src/pipelines/common_steps.rs

//! Row-level building blocks shared by several pipelines.

use crate::errors::{CommerceError, Result};
use crate::models::{Order, OrderItem, OrderStatus, Payment, PaymentStatus};
use crate::pipelines::contexts::ReconcileOutcome;
use crate::store::TxHandle;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Units per variant across `items`, for one stock adjustment each.
pub fn units_per_variant(items: &[OrderItem]) -> Result<BTreeMap<Uuid, i32>> {
  let mut units: BTreeMap<Uuid, i32> = BTreeMap::new();
  for item in items {
    let total = units.entry(item.variant_id).or_insert(0);
    *total = total
      .checked_add(item.quantity)
      .ok_or_else(|| CommerceError::Validation(format!("quantity of variant {} overflows", item.variant_id)))?;
  }
  Ok(units)
}

/// Loads an order about to move to `target`. With a `required` status the
/// order must be in it and the order state machine must allow the move.
/// Orders that already reached a terminal status are never reversed a
/// second time.
#[instrument(name = "common_step::load_order", skip(tx), err(Display))]
pub async fn load_reversible_order(
  tx: &TxHandle,
  order_id: Uuid,
  required: Option<OrderStatus>,
  target: OrderStatus,
) -> Result<Order> {
  let order = tx
    .lock()
    .await
    .get_order(order_id)
    .await?
    .ok_or_else(|| CommerceError::not_found("order", order_id))?;

  if let Some(required) = required {
    if order.status != required || !order.status.can_transition_to(target) {
      warn!(actual = %order.status, expected = %required, "Order is not in the required status.");
      return Err(CommerceError::InvalidOrderState {
        order_id,
        actual: order.status,
        expected: required.to_string(),
      });
    }
  }
  if order.status.is_terminal() {
    warn!(status = %order.status, "Order is already closed.");
    return Err(CommerceError::InvalidOrderState {
      order_id,
      actual: order.status,
      expected: "an open order".to_string(),
    });
  }
  Ok(order)
}

/// Moves `payment` to `target` if the payment state machine allows it.
///
/// Replaying the current status is `Unchanged`; a forbidden transition is
/// logged and `Ignored`. Neither writes.
#[instrument(
  name = "common_step::apply_payment_status",
  skip(tx, payment),
  fields(payment_id = %payment.id, from = %payment.status, to = %target),
  err(Display)
)]
pub async fn apply_payment_status(tx: &TxHandle, payment: &Payment, target: PaymentStatus) -> Result<ReconcileOutcome> {
  if payment.status == target {
    info!("Payment already has this status.");
    return Ok(ReconcileOutcome::Unchanged(target));
  }
  if !payment.status.can_transition_to(target) {
    warn!("Payment transition not allowed; ignoring.");
    return Ok(ReconcileOutcome::Ignored);
  }

  let mut next = payment.clone();
  next.status = target;
  tx.lock().await.update_payment(&next).await?;
  info!("Payment status updated.");
  Ok(ReconcileOutcome::Applied {
    from: payment.status,
    to: target,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(variant_id: Uuid, quantity: i32) -> OrderItem {
    OrderItem {
      id: Uuid::new_v4(),
      order_id: Uuid::nil(),
      variant_id,
      quantity,
      unit_price_cents: 1,
      line_total_cents: i64::from(quantity),
      product_name: "Bolt".to_string(),
      sku: "BOLT-1".to_string(),
      attributes: serde_json::json!({}),
    }
  }

  #[test]
  fn units_are_summed_per_variant() {
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let units = units_per_variant(&[item(a, 2), item(b, 1), item(a, 3)]).unwrap();
    assert_eq!(units.len(), 2);
    assert_eq!(units[&a], 5);
    assert_eq!(units[&b], 1);
  }

  #[test]
  fn overflowing_units_are_a_validation_error() {
    let a = Uuid::new_v4();
    let err = units_per_variant(&[item(a, i32::MAX), item(a, 1)]).unwrap_err();
    assert!(matches!(err, CommerceError::Validation(_)));
  }
}
