// tests/webhook_tests.rs
mod common;

use commerce::gateway::{GatewayOp, GatewayPaymentStatus};
use commerce::models::{OrderStatus, PaymentMethod, PaymentStatus};
use commerce::{CheckoutReceipt, CommerceError, ReconcileOutcome};
use common::*;

async fn card_checkout(shop: &Shop) -> (CheckoutReceipt, String) {
  let variant = shop.add_variant(7_500, 4).await;
  let cart_id = shop.add_cart(&[(variant, 1)]).await;
  let receipt = shop
    .service
    .checkout(shop.request(cart_id, vec![], PaymentMethod::Card))
    .await
    .unwrap();
  let intent_id = receipt.payment.intent_id.clone().unwrap();
  (receipt, intent_id)
}

#[tokio::test]
async fn test_succeeded_event_is_idempotent() {
  let shop = Shop::new().await;
  let (receipt, intent_id) = card_checkout(&shop).await;

  let first = shop
    .service
    .apply_gateway_event(&intent_id, "payment_intent.succeeded")
    .await
    .unwrap();
  assert_eq!(
    first,
    ReconcileOutcome::Applied {
      from: PaymentStatus::Pending,
      to: PaymentStatus::Success,
    }
  );
  let after_first = shop.payment_of(receipt.order.id).await;

  let replay = shop.service.apply_gateway_event(&intent_id, "succeeded").await.unwrap();
  assert_eq!(replay, ReconcileOutcome::Unchanged(PaymentStatus::Success));

  let after_replay = shop.payment_of(receipt.order.id).await;
  assert_eq!(after_replay, after_first);
  assert_eq!(after_replay.status, PaymentStatus::Success);
}

#[tokio::test]
async fn test_event_never_moves_the_order() {
  let shop = Shop::new().await;
  let (receipt, intent_id) = card_checkout(&shop).await;

  shop
    .service
    .apply_gateway_event(&intent_id, "payment_intent.payment_failed")
    .await
    .unwrap();

  let tables = shop.tables().await;
  assert_eq!(tables.payment_of(receipt.order.id).unwrap().status, PaymentStatus::Failed);
  assert_eq!(tables.orders[&receipt.order.id].status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_processing_then_succeeded() {
  let shop = Shop::new().await;
  let (receipt, intent_id) = card_checkout(&shop).await;

  let processing = shop.service.apply_gateway_event(&intent_id, "processing").await.unwrap();
  assert_eq!(
    processing,
    ReconcileOutcome::Applied {
      from: PaymentStatus::Pending,
      to: PaymentStatus::Processing,
    }
  );
  let succeeded = shop.service.apply_gateway_event(&intent_id, "succeeded").await.unwrap();
  assert_eq!(
    succeeded,
    ReconcileOutcome::Applied {
      from: PaymentStatus::Processing,
      to: PaymentStatus::Success,
    }
  );
  assert_eq!(shop.payment_of(receipt.order.id).await.status, PaymentStatus::Success);
}

#[tokio::test]
async fn test_unknown_event_type_is_ignored() {
  let shop = Shop::new().await;
  let (receipt, intent_id) = card_checkout(&shop).await;
  let before = shop.payment_of(receipt.order.id).await;

  let outcome = shop
    .service
    .apply_gateway_event(&intent_id, "charge.dispute.created")
    .await
    .unwrap();

  assert_eq!(outcome, ReconcileOutcome::Ignored);
  assert_eq!(shop.payment_of(receipt.order.id).await, before);
}

#[tokio::test]
async fn test_unknown_intent_is_not_found() {
  let shop = Shop::new().await;
  card_checkout(&shop).await;

  let err = shop
    .service
    .apply_gateway_event("pi_does_not_exist", "succeeded")
    .await
    .unwrap_err();

  assert!(matches!(err, CommerceError::NotFound { entity: "payment", ref id } if id == "pi_does_not_exist"));
}

#[tokio::test]
async fn test_late_event_cannot_reopen_a_closed_payment() {
  let shop = Shop::new().await;
  let (receipt, intent_id) = card_checkout(&shop).await;
  shop.service.cancel_pending_order(receipt.order.id).await.unwrap();

  let outcome = shop.service.apply_gateway_event(&intent_id, "succeeded").await.unwrap();

  assert_eq!(outcome, ReconcileOutcome::Ignored);
  let tables = shop.tables().await;
  assert_eq!(tables.payment_of(receipt.order.id).unwrap().status, PaymentStatus::Cancelled);
  assert_eq!(tables.orders[&receipt.order.id].status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_captured_payment_ignores_failure_event() {
  let shop = Shop::new().await;
  let (receipt, intent_id) = card_checkout(&shop).await;
  shop.service.apply_gateway_event(&intent_id, "succeeded").await.unwrap();

  let outcome = shop.service.apply_gateway_event(&intent_id, "payment_failed").await.unwrap();

  assert_eq!(outcome, ReconcileOutcome::Ignored);
  assert_eq!(shop.payment_of(receipt.order.id).await.status, PaymentStatus::Success);
}

#[tokio::test]
async fn test_sync_applies_gateway_status() {
  let shop = Shop::new().await;
  let (receipt, intent_id) = card_checkout(&shop).await;

  // The customer has not confirmed yet.
  let waiting = shop.service.sync_payment_status(receipt.order.id).await.unwrap();
  assert_eq!(waiting, ReconcileOutcome::Unchanged(PaymentStatus::Pending));

  shop.stripe.settle(&intent_id).unwrap();
  let synced = shop.service.sync_payment_status(receipt.order.id).await.unwrap();
  assert_eq!(
    synced,
    ReconcileOutcome::Applied {
      from: PaymentStatus::Pending,
      to: PaymentStatus::Success,
    }
  );
  assert_eq!(shop.payment_of(receipt.order.id).await.status, PaymentStatus::Success);

  let again = shop.service.sync_payment_status(receipt.order.id).await.unwrap();
  assert_eq!(again, ReconcileOutcome::Unchanged(PaymentStatus::Success));
  assert_eq!(shop.stripe.calls(GatewayOp::GetStatus), 3);
}

#[tokio::test]
async fn test_sync_of_offline_payment_skips_gateway() {
  let shop = Shop::new().await;
  let variant = shop.add_variant(1_000, 2).await;
  let cart_id = shop.add_cart(&[(variant, 1)]).await;
  let receipt = shop
    .service
    .checkout(shop.request(cart_id, vec![], PaymentMethod::Cod))
    .await
    .unwrap();

  let outcome = shop.service.sync_payment_status(receipt.order.id).await.unwrap();

  assert_eq!(outcome, ReconcileOutcome::Unchanged(PaymentStatus::Pending));
  assert_eq!(shop.stripe.total_calls() + shop.paypal.total_calls(), 0);
}

#[tokio::test]
async fn test_sync_reports_gateway_errors() {
  let shop = Shop::new().await;
  let (receipt, intent_id) = card_checkout(&shop).await;
  shop.stripe.set_status(&intent_id, GatewayPaymentStatus::Failed).unwrap();
  shop.stripe.fail(GatewayOp::GetStatus);

  let err = shop.service.sync_payment_status(receipt.order.id).await.unwrap_err();
  assert!(matches!(err, CommerceError::Gateway { .. }));
  assert_eq!(shop.payment_of(receipt.order.id).await.status, PaymentStatus::Pending);

  shop.stripe.recover(GatewayOp::GetStatus);
  let outcome = shop.service.sync_payment_status(receipt.order.id).await.unwrap();
  assert_eq!(
    outcome,
    ReconcileOutcome::Applied {
      from: PaymentStatus::Pending,
      to: PaymentStatus::Failed,
    }
  );
}
