// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use commerce::models::{
  Cart, CartItem, CartStatus, Customer, Discount, DiscountKind, Gateway, OrderStatus, Payment, PaymentMethod,
  PaymentStatus, ProductVariant, ShippingSnapshot,
};
use commerce::store::memory::Tables;
use commerce::{
  CheckoutRequest, CommerceError, GatewayRegistry, MemoryStore, OrderService, PaymentCompensator, PaymentRouting,
  SimulatedGateway,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

static TRACING: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("commerce=debug,orderflow=info")),
    )
    .with_test_writer()
    .try_init();
});

pub fn setup_tracing() {
  once_cell::sync::Lazy::force(&TRACING);
}

/// A service over a fresh `MemoryStore` with simulated Stripe and PayPal
/// adapters and one seeded customer.
pub struct Shop {
  pub store: MemoryStore,
  pub stripe: Arc<SimulatedGateway>,
  pub paypal: Arc<SimulatedGateway>,
  pub service: OrderService,
  pub customer_id: Uuid,
}

impl Shop {
  pub async fn new() -> Self {
    Self::with_routing(PaymentRouting::default()).await
  }

  pub async fn with_routing(routing: PaymentRouting) -> Self {
    setup_tracing();
    let store = MemoryStore::new();
    let stripe = Arc::new(SimulatedGateway::new(Gateway::Stripe));
    let paypal = Arc::new(SimulatedGateway::new(Gateway::Paypal));
    let gateways = GatewayRegistry::new().with(stripe.clone()).with(paypal.clone());
    let service = OrderService::new(Arc::new(store.clone()), gateways, routing);

    let customer_id = Uuid::new_v4();
    store
      .seed(|t| {
        t.customers.insert(
          customer_id,
          Customer {
            id: customer_id,
            email: "buyer@example.com".to_string(),
            created_at: Utc::now(),
          },
        )
      })
      .await;

    Self {
      store,
      stripe,
      paypal,
      service,
      customer_id,
    }
  }

  pub async fn add_variant(&self, price_cents: i64, stock: i32) -> Uuid {
    let id = Uuid::new_v4();
    let variant = ProductVariant {
      id,
      product_name: format!("Product {}", &id.simple().to_string()[..6]),
      sku: format!("SKU-{}", id.simple()),
      price_cents,
      stock,
      attributes: serde_json::json!({ "size": "M" }),
      updated_at: Utc::now(),
    };
    self.store.seed(|t| t.variants.insert(id, variant)).await;
    id
  }

  /// An active cart of `customer_id` holding `(variant, quantity)` lines.
  pub async fn add_cart_for(&self, customer_id: Uuid, lines: &[(Uuid, i32)]) -> Uuid {
    let cart_id = Uuid::new_v4();
    let now = Utc::now();
    let items: Vec<CartItem> = lines
      .iter()
      .enumerate()
      .map(|(i, (variant_id, quantity))| CartItem {
        id: Uuid::new_v4(),
        cart_id,
        variant_id: *variant_id,
        quantity: *quantity,
        price_cents: 1,
        added_at: now + chrono::Duration::milliseconds(i as i64),
      })
      .collect();
    self
      .store
      .seed(|t| {
        t.carts.insert(
          cart_id,
          Cart {
            id: cart_id,
            customer_id,
            status: CartStatus::Active,
            created_at: now,
            updated_at: now,
          },
        );
        t.cart_items.extend(items);
      })
      .await;
    cart_id
  }

  pub async fn add_cart(&self, lines: &[(Uuid, i32)]) -> Uuid {
    self.add_cart_for(self.customer_id, lines).await
  }

  pub async fn add_discount(&self, kind: DiscountKind, value: i64, customize: impl FnOnce(&mut Discount)) -> Uuid {
    let id = Uuid::new_v4();
    let mut discount = Discount {
      id,
      code: format!("CODE-{}", &id.simple().to_string()[..8]),
      kind,
      value,
      max_discount_cents: None,
      min_order_cents: 0,
      usage_limit: None,
      per_customer_limit: None,
      starts_at: None,
      ends_at: None,
      is_active: true,
      created_at: Utc::now(),
    };
    customize(&mut discount);
    self.store.seed(|t| t.discounts.insert(id, discount)).await;
    id
  }

  pub async fn add_fixed_discount(&self, amount_cents: i64) -> Uuid {
    self.add_discount(DiscountKind::Fixed, amount_cents, |_| {}).await
  }

  pub fn request(&self, cart_id: Uuid, discount_ids: Vec<Uuid>, method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
      customer_id: self.customer_id,
      cart_id,
      shipping: shipping(),
      discount_ids,
      method,
    }
  }

  /// Moves an order along the fulfillment chain, as the status-update
  /// endpoint would.
  pub async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) {
    self
      .store
      .seed(|t| {
        if let Some(order) = t.orders.get_mut(&order_id) {
          order.status = status;
        }
      })
      .await;
  }

  pub async fn set_payment_status(&self, order_id: Uuid, status: PaymentStatus) {
    self
      .store
      .seed(|t| {
        if let Some(payment) = t.payments.values_mut().find(|p| p.order_id == order_id) {
          payment.status = status;
        }
      })
      .await;
  }

  pub async fn tables(&self) -> Tables {
    self.store.snapshot().await
  }

  pub async fn payment_of(&self, order_id: Uuid) -> Payment {
    self
      .tables()
      .await
      .payment_of(order_id)
      .cloned()
      .expect("order has a payment")
  }

  pub async fn stock_of(&self, variant_id: Uuid) -> i32 {
    self.tables().await.variants[&variant_id].stock
  }
}

pub fn shipping() -> ShippingSnapshot {
  ShippingSnapshot {
    street: "12 Ly Thuong Kiet".to_string(),
    ward: "Ward 7".to_string(),
    district: "District 10".to_string(),
    city: "Ho Chi Minh City".to_string(),
    phone: "0901234567".to_string(),
  }
}

/// Asserts that no checkout left anything behind.
pub fn assert_no_checkout_rows(tables: &Tables) {
  assert!(tables.orders.is_empty(), "orders: {:?}", tables.orders);
  assert!(tables.order_items.is_empty(), "order items: {:?}", tables.order_items);
  assert!(tables.payments.is_empty(), "payments: {:?}", tables.payments);
  assert!(
    tables.discount_usages.is_empty(),
    "discount usages: {:?}",
    tables.discount_usages
  );
}

/// A compensator whose answers are fixed up front.
#[derive(Default)]
pub struct ScriptedCompensator {
  pub fail_cancel: bool,
  pub fail_refund: bool,
  pub refund_id: Option<String>,
  cancels: AtomicUsize,
  refunds: AtomicUsize,
}

impl ScriptedCompensator {
  pub fn failing() -> Arc<Self> {
    Arc::new(Self {
      fail_cancel: true,
      fail_refund: true,
      ..Default::default()
    })
  }

  pub fn refunding_with(refund_id: &str) -> Arc<Self> {
    Arc::new(Self {
      refund_id: Some(refund_id.to_string()),
      ..Default::default()
    })
  }

  pub fn cancels(&self) -> usize {
    self.cancels.load(Ordering::SeqCst)
  }

  pub fn refunds(&self) -> usize {
    self.refunds.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl PaymentCompensator for ScriptedCompensator {
  async fn cancel_payment(&self, payment: &Payment) -> commerce::Result<()> {
    self.cancels.fetch_add(1, Ordering::SeqCst);
    if self.fail_cancel {
      return Err(CommerceError::gateway(
        payment.gateway.unwrap_or(Gateway::Stripe),
        "cancel declined",
      ));
    }
    Ok(())
  }

  async fn refund_payment(&self, payment: &Payment) -> commerce::Result<Option<String>> {
    self.refunds.fetch_add(1, Ordering::SeqCst);
    if self.fail_refund {
      return Err(CommerceError::gateway(
        payment.gateway.unwrap_or(Gateway::Stripe),
        "refund declined",
      ));
    }
    Ok(self.refund_id.clone())
  }
}
