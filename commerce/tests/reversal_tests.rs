// tests/reversal_tests.rs
mod common;

use commerce::gateway::{GatewayOp, GatewayPaymentStatus};
use commerce::models::{Gateway, OrderStatus, PaymentMethod, PaymentStatus};
use commerce::{CheckoutReceipt, CommerceError, ReconcileOutcome, Store};
use common::*;
use uuid::Uuid;

async fn checkout(shop: &Shop, method: PaymentMethod) -> (CheckoutReceipt, Uuid) {
  let variant = shop.add_variant(5_000, 10).await;
  let cart_id = shop.add_cart(&[(variant, 2)]).await;
  let receipt = shop
    .service
    .checkout(shop.request(cart_id, vec![], method))
    .await
    .unwrap();
  (receipt, variant)
}

/// Captures the payment through the gateway and its webhook, then walks the
/// order to `delivered`.
async fn deliver(shop: &Shop, receipt: &CheckoutReceipt) {
  let intent_id = receipt.payment.intent_id.as_deref().unwrap();
  shop.stripe.settle(intent_id).unwrap();
  let outcome = shop
    .service
    .apply_gateway_event(intent_id, "payment_intent.succeeded")
    .await
    .unwrap();
  assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));
  shop.set_order_status(receipt.order.id, OrderStatus::Delivered).await;
}

#[tokio::test]
async fn test_gateway_refusal_keeps_order_pending() {
  let shop = Shop::new().await;
  shop.stripe.queue_intent_id("pi_123");
  let (receipt, variant) = checkout(&shop, PaymentMethod::Card).await;
  assert_eq!(receipt.payment.intent_id.as_deref(), Some("pi_123"));

  let compensator = ScriptedCompensator::failing();
  let err = shop
    .service
    .cancel(receipt.order.id, compensator.clone())
    .await
    .unwrap_err();

  assert!(matches!(err, CommerceError::Gateway { .. }));
  assert_eq!(compensator.cancels(), 1);
  let tables = shop.tables().await;
  assert_eq!(tables.orders[&receipt.order.id].status, OrderStatus::Pending);
  assert_eq!(tables.payment_of(receipt.order.id).unwrap().status, PaymentStatus::Pending);
  assert_eq!(tables.variants[&variant].stock, 8);
}

#[tokio::test]
async fn test_cancel_voids_intent_and_restores_stock() {
  let shop = Shop::new().await;
  let (receipt, variant) = checkout(&shop, PaymentMethod::Card).await;
  assert_eq!(shop.stock_of(variant).await, 8);
  let intent_id = receipt.payment.intent_id.clone().unwrap();

  let reversal = shop.service.cancel_pending_order(receipt.order.id).await.unwrap();

  assert_eq!(reversal.order.status, OrderStatus::Cancelled);
  let payment = reversal.payment.unwrap();
  assert_eq!(payment.status, PaymentStatus::Cancelled);
  assert_eq!(shop.stripe.calls(GatewayOp::Cancel), 1);
  assert_eq!(shop.stripe.intent_status(&intent_id), Some(GatewayPaymentStatus::Canceled));

  let tables = shop.tables().await;
  assert_eq!(tables.variants[&variant].stock, 10);
  assert_eq!(tables.orders[&receipt.order.id].status, OrderStatus::Cancelled);
  assert_eq!(tables.payment_of(receipt.order.id).unwrap().status, PaymentStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_keeps_discount_usage() {
  let shop = Shop::new().await;
  let lamp = shop.add_variant(4_000, 5).await;
  let cart_id = shop.add_cart(&[(lamp, 1)]).await;
  let discount_id = shop.add_fixed_discount(500).await;
  let receipt = shop
    .service
    .checkout(shop.request(cart_id, vec![discount_id], PaymentMethod::Card))
    .await
    .unwrap();

  shop.service.cancel_pending_order(receipt.order.id).await.unwrap();

  let tx = shop.store.begin().await.unwrap();
  let usages = tx
    .lock()
    .await
    .list_discount_usage_for_order(receipt.order.id)
    .await
    .unwrap();
  tx.lock().await.rollback().await.unwrap();
  assert_eq!(usages.len(), 1);
  assert_eq!(usages[0].discount_id, discount_id);
  assert_eq!(usages[0].amount_cents, 500);
}

#[tokio::test]
async fn test_offline_cancel_skips_compensator() {
  let shop = Shop::new().await;
  let (receipt, variant) = checkout(&shop, PaymentMethod::Cod).await;

  let compensator = ScriptedCompensator::failing();
  let reversal = shop.service.cancel(receipt.order.id, compensator.clone()).await.unwrap();

  assert_eq!(compensator.cancels(), 0);
  assert_eq!(reversal.order.status, OrderStatus::Cancelled);
  assert_eq!(reversal.payment.map(|p| p.status), Some(PaymentStatus::Cancelled));
  assert_eq!(shop.stock_of(variant).await, 10);
}

#[tokio::test]
async fn test_captured_payment_cannot_be_cancelled() {
  let shop = Shop::new().await;
  let (receipt, variant) = checkout(&shop, PaymentMethod::Card).await;
  shop.set_payment_status(receipt.order.id, PaymentStatus::Success).await;
  let before = shop.tables().await;

  let compensator = ScriptedCompensator::refunding_with("re_unused");
  let err = shop
    .service
    .cancel(receipt.order.id, compensator.clone())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    CommerceError::PaymentAlreadyCaptured {
      status: PaymentStatus::Success,
      ..
    }
  ));
  assert_eq!(compensator.cancels() + compensator.refunds(), 0);
  let after = shop.tables().await;
  assert_eq!(after.orders, before.orders);
  assert_eq!(after.payments, before.payments);
  assert_eq!(after.variants[&variant].stock, 8);
}

#[tokio::test]
async fn test_closed_orders_are_not_reversed_again() {
  let shop = Shop::new().await;
  let (receipt, variant) = checkout(&shop, PaymentMethod::Cod).await;
  shop.service.cancel_pending_order(receipt.order.id).await.unwrap();

  let err = shop.service.cancel_pending_order(receipt.order.id).await.unwrap_err();
  assert!(matches!(
    err,
    CommerceError::InvalidOrderState {
      actual: OrderStatus::Cancelled,
      ..
    }
  ));
  let err = shop
    .service
    .cancel(receipt.order.id, shop.service.compensator())
    .await
    .unwrap_err();
  assert!(matches!(err, CommerceError::InvalidOrderState { .. }));
  let err = shop
    .service
    .refund(receipt.order.id, ScriptedCompensator::refunding_with("re_1"))
    .await
    .unwrap_err();
  assert!(matches!(err, CommerceError::InvalidOrderState { .. }));

  // Stock came back once, not twice.
  assert_eq!(shop.stock_of(variant).await, 10);
}

#[tokio::test]
async fn test_cancel_pending_order_requires_pending() {
  let shop = Shop::new().await;
  let (receipt, _) = checkout(&shop, PaymentMethod::Cod).await;
  shop.set_order_status(receipt.order.id, OrderStatus::Shipped).await;

  let err = shop.service.cancel_pending_order(receipt.order.id).await.unwrap_err();
  assert!(matches!(
    err,
    CommerceError::InvalidOrderState {
      actual: OrderStatus::Shipped,
      ..
    }
  ));
  assert_eq!(
    shop.tables().await.orders[&receipt.order.id].status,
    OrderStatus::Shipped
  );
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
  let shop = Shop::new().await;
  let err = shop.service.cancel_pending_order(Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, CommerceError::NotFound { entity: "order", .. }));
  let err = shop.service.refund_delivered_order(Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, CommerceError::NotFound { entity: "order", .. }));
}

#[tokio::test]
async fn test_refund_records_provider_refund_id() {
  let shop = Shop::new().await;
  let (receipt, variant) = checkout(&shop, PaymentMethod::Card).await;
  shop.set_payment_status(receipt.order.id, PaymentStatus::Success).await;
  shop.set_order_status(receipt.order.id, OrderStatus::Delivered).await;

  let compensator = ScriptedCompensator::refunding_with("re_1");
  let reversal = shop.service.refund(receipt.order.id, compensator.clone()).await.unwrap();

  assert_eq!(compensator.refunds(), 1);
  assert_eq!(reversal.order.status, OrderStatus::Refunded);
  let payment = reversal.payment.unwrap();
  assert_eq!(payment.status, PaymentStatus::Refunded);
  assert_eq!(payment.refund_id.as_deref(), Some("re_1"));

  let stored = shop.payment_of(receipt.order.id).await;
  assert_eq!(stored.status, PaymentStatus::Refunded);
  assert_eq!(stored.refund_id.as_deref(), Some("re_1"));
  // Refunds do not restock.
  assert_eq!(shop.stock_of(variant).await, 8);
}

#[tokio::test]
async fn test_pending_payment_cannot_be_refunded() {
  let shop = Shop::new().await;
  let (receipt, _) = checkout(&shop, PaymentMethod::Card).await;
  let before = shop.tables().await;

  let compensator = ScriptedCompensator::refunding_with("re_1");
  let err = shop
    .service
    .refund(receipt.order.id, compensator.clone())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    CommerceError::PaymentNotSettled {
      status: Some(PaymentStatus::Pending),
      ..
    }
  ));
  assert_eq!(compensator.refunds(), 0);
  let after = shop.tables().await;
  assert_eq!(after.orders, before.orders);
  assert_eq!(after.payments, before.payments);
  assert_eq!(after.orders[&receipt.order.id].status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_refund_delivered_order_through_gateway() {
  let shop = Shop::new().await;
  let (receipt, _) = checkout(&shop, PaymentMethod::Card).await;
  deliver(&shop, &receipt).await;

  let reversal = shop.service.refund_delivered_order(receipt.order.id).await.unwrap();

  assert_eq!(reversal.order.status, OrderStatus::Refunded);
  let payment = reversal.payment.unwrap();
  assert_eq!(payment.status, PaymentStatus::Refunded);
  assert!(payment.refund_id.as_deref().is_some_and(|id| id.starts_with("re_")));
  assert_eq!(shop.stripe.calls(GatewayOp::Refund), 1);
  assert_eq!(
    shop.stripe.intent_status(receipt.payment.intent_id.as_deref().unwrap()),
    Some(GatewayPaymentStatus::Refunded)
  );
}

#[tokio::test]
async fn test_refund_delivered_order_requires_delivery() {
  let shop = Shop::new().await;
  let (receipt, _) = checkout(&shop, PaymentMethod::Card).await;
  shop.set_payment_status(receipt.order.id, PaymentStatus::Success).await;

  let err = shop.service.refund_delivered_order(receipt.order.id).await.unwrap_err();
  assert!(matches!(
    err,
    CommerceError::InvalidOrderState {
      actual: OrderStatus::Pending,
      ..
    }
  ));
  assert_eq!(shop.stripe.calls(GatewayOp::Refund), 0);
}

#[tokio::test]
async fn test_provider_without_refund_ids() {
  let shop = Shop::new().await;
  let (receipt, _) = checkout(&shop, PaymentMethod::Card).await;
  deliver(&shop, &receipt).await;
  shop.stripe.omit_refund_ids();

  let reversal = shop.service.refund_delivered_order(receipt.order.id).await.unwrap();
  let payment = reversal.payment.unwrap();
  assert_eq!(payment.status, PaymentStatus::Refunded);
  assert_eq!(payment.refund_id, None);
}

#[tokio::test]
async fn test_fully_discounted_order_refunds_without_gateway() {
  let shop = Shop::new().await;
  let variant = shop.add_variant(2_500, 3).await;
  let cart_id = shop.add_cart(&[(variant, 1)]).await;
  let discount_id = shop.add_fixed_discount(10_000).await;
  let receipt = shop
    .service
    .checkout(shop.request(cart_id, vec![discount_id], PaymentMethod::Card))
    .await
    .unwrap();
  assert_eq!(receipt.payment.status, PaymentStatus::Success);
  shop.set_order_status(receipt.order.id, OrderStatus::Delivered).await;

  let compensator = ScriptedCompensator::failing();
  let reversal = shop.service.refund(receipt.order.id, compensator.clone()).await.unwrap();

  assert_eq!(compensator.refunds(), 0);
  let payment = reversal.payment.unwrap();
  assert_eq!(payment.status, PaymentStatus::Refunded);
  assert_eq!(payment.refund_id, None);
  // Discount usage stays recorded.
  assert_eq!(shop.tables().await.discount_usages.len(), 1);
}

#[tokio::test]
async fn test_failed_gateway_refund_changes_nothing() {
  let shop = Shop::new().await;
  let (receipt, _) = checkout(&shop, PaymentMethod::Card).await;
  deliver(&shop, &receipt).await;
  shop.stripe.fail(GatewayOp::Refund);

  let err = shop.service.refund_delivered_order(receipt.order.id).await.unwrap_err();

  assert!(matches!(err, CommerceError::Gateway { gateway: Gateway::Stripe, .. }));
  let tables = shop.tables().await;
  assert_eq!(tables.orders[&receipt.order.id].status, OrderStatus::Delivered);
  let payment = tables.payment_of(receipt.order.id).unwrap();
  assert_eq!(payment.status, PaymentStatus::Success);
  assert_eq!(payment.refund_id, None);
}

#[tokio::test]
async fn test_gated_helpers_use_the_configured_compensator() {
  let shop = Shop::new().await;
  let (receipt, _) = checkout(&shop, PaymentMethod::Card).await;
  let compensator = ScriptedCompensator::failing();
  let service = commerce::OrderService::new(
    std::sync::Arc::new(shop.store.clone()),
    shop.service.gateways().clone(),
    commerce::PaymentRouting::default(),
  )
  .with_compensator(compensator.clone());

  let err = service.cancel_pending_order(receipt.order.id).await.unwrap_err();

  assert!(matches!(err, CommerceError::Gateway { .. }));
  assert_eq!(compensator.cancels(), 1);
  assert_eq!(shop.stripe.calls(GatewayOp::Cancel), 0);
  assert_eq!(
    shop.tables().await.orders[&receipt.order.id].status,
    OrderStatus::Pending
  );
}
