// commerce/src/store/memory.rs

//! In-process store used by tests and local runs.
//!
//! A transaction takes the store's owned mutex guard, so transactions are
//! serialized, and works on a copy of the tables. `commit` swaps the copy in;
//! `rollback` or dropping the transaction discards it.

use crate::errors::{CommerceError, Result};
use crate::models::{
  Cart, CartItem, CartStatus, Customer, Discount, DiscountUsage, Order, OrderItem, OrderStatus, Payment,
  ProductVariant,
};
use crate::store::{Store, StoreTx, TxHandle};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{event, instrument, Level};
use uuid::Uuid;

/// Every table of the schema.
#[derive(Debug, Clone, Default)]
pub struct Tables {
  pub customers: HashMap<Uuid, Customer>,
  pub carts: HashMap<Uuid, Cart>,
  pub cart_items: Vec<CartItem>,
  pub variants: HashMap<Uuid, ProductVariant>,
  pub discounts: HashMap<Uuid, Discount>,
  pub discount_usages: Vec<DiscountUsage>,
  pub orders: HashMap<Uuid, Order>,
  pub order_items: Vec<OrderItem>,
  pub payments: HashMap<Uuid, Payment>,
}

impl Tables {
  pub fn cart_items_of(&self, cart_id: Uuid) -> Vec<&CartItem> {
    self.cart_items.iter().filter(|i| i.cart_id == cart_id).collect()
  }

  pub fn payment_of(&self, order_id: Uuid) -> Option<&Payment> {
    self.payments.values().find(|p| p.order_id == order_id)
  }
}

/// Write operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
  ClearCart,
  AdjustStock,
  InsertDiscountUsage,
  CreateOrder,
  UpdateOrderStatus,
  CreateOrderItems,
  CreatePayment,
  UpdatePayment,
  Commit,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
  tables: Arc<Mutex<Tables>>,
  faults: Arc<SyncMutex<HashSet<FailPoint>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes every later `point` operation fail until `clear_faults`.
  pub fn fail_on(&self, point: FailPoint) {
    self.faults.lock().insert(point);
  }

  pub fn clear_faults(&self) {
    self.faults.lock().clear();
  }

  /// Applies `f` to the committed tables, outside any transaction.
  pub async fn seed<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
    let mut tables = self.tables.lock().await;
    f(&mut tables)
  }

  /// A copy of the committed tables.
  pub async fn snapshot(&self) -> Tables {
    self.tables.lock().await.clone()
  }
}

#[async_trait]
impl Store for MemoryStore {
  #[instrument(name = "MemoryStore::begin", skip_all)]
  async fn begin(&self) -> Result<TxHandle> {
    let guard = Arc::clone(&self.tables).lock_owned().await;
    let working = guard.clone();
    event!(Level::DEBUG, "Memory transaction opened.");
    Ok(TxHandle::new(Box::new(MemoryTx {
      guard: Some(guard),
      working,
      faults: Arc::clone(&self.faults),
    })))
  }
}

pub struct MemoryTx {
  guard: Option<OwnedMutexGuard<Tables>>,
  working: Tables,
  faults: Arc<SyncMutex<HashSet<FailPoint>>>,
}

impl MemoryTx {
  fn open(&mut self) -> Result<&mut Tables> {
    if self.guard.is_none() {
      return Err(CommerceError::StoreFault("transaction already finished".to_string()));
    }
    Ok(&mut self.working)
  }

  fn check(&self, point: FailPoint) -> Result<()> {
    if self.faults.lock().contains(&point) {
      event!(Level::WARN, ?point, "Injected store fault.");
      return Err(CommerceError::StoreFault(format!("injected failure at {:?}", point)));
    }
    Ok(())
  }

  fn writable(&mut self, point: FailPoint) -> Result<&mut Tables> {
    self.check(point)?;
    self.open()
  }
}

#[async_trait]
impl StoreTx for MemoryTx {
  async fn get_customer(&mut self, customer_id: Uuid) -> Result<Option<Customer>> {
    Ok(self.open()?.customers.get(&customer_id).cloned())
  }

  async fn get_cart(&mut self, cart_id: Uuid) -> Result<Option<Cart>> {
    Ok(self.open()?.carts.get(&cart_id).cloned())
  }

  async fn list_cart_items(&mut self, cart_id: Uuid) -> Result<Vec<CartItem>> {
    let tables = self.open()?;
    let mut items: Vec<CartItem> = tables.cart_items_of(cart_id).into_iter().cloned().collect();
    items.sort_by_key(|i| i.added_at);
    Ok(items)
  }

  async fn clear_cart(&mut self, cart_id: Uuid) -> Result<()> {
    let tables = self.writable(FailPoint::ClearCart)?;
    let cart = tables
      .carts
      .get_mut(&cart_id)
      .ok_or_else(|| CommerceError::not_found("cart", cart_id))?;
    cart.status = CartStatus::CheckedOut;
    cart.updated_at = Utc::now();
    tables.cart_items.retain(|i| i.cart_id != cart_id);
    Ok(())
  }

  async fn get_variant(&mut self, variant_id: Uuid) -> Result<Option<ProductVariant>> {
    Ok(self.open()?.variants.get(&variant_id).cloned())
  }

  async fn adjust_variant_stock(&mut self, variant_id: Uuid, delta: i32) -> Result<i32> {
    let tables = self.writable(FailPoint::AdjustStock)?;
    let variant = tables
      .variants
      .get_mut(&variant_id)
      .ok_or_else(|| CommerceError::not_found("product variant", variant_id))?;
    let next = variant.stock.checked_add(delta).filter(|s| *s >= 0).ok_or(CommerceError::InsufficientStock {
      variant_id,
      requested: delta.saturating_neg(),
      available: variant.stock,
    })?;
    variant.stock = next;
    variant.updated_at = Utc::now();
    Ok(next)
  }

  async fn get_discount(&mut self, discount_id: Uuid) -> Result<Option<Discount>> {
    Ok(self.open()?.discounts.get(&discount_id).cloned())
  }

  async fn count_discount_usage(&mut self, discount_id: Uuid, customer_id: Option<Uuid>) -> Result<i64> {
    let tables = self.open()?;
    let count = tables
      .discount_usages
      .iter()
      .filter(|u| u.discount_id == discount_id && customer_id.map_or(true, |c| u.customer_id == c))
      .count();
    Ok(count as i64)
  }

  async fn insert_discount_usage(&mut self, usage: &DiscountUsage) -> Result<()> {
    self.writable(FailPoint::InsertDiscountUsage)?.discount_usages.push(usage.clone());
    Ok(())
  }

  async fn list_discount_usage_for_order(&mut self, order_id: Uuid) -> Result<Vec<DiscountUsage>> {
    let tables = self.open()?;
    Ok(tables.discount_usages.iter().filter(|u| u.order_id == order_id).cloned().collect())
  }

  async fn create_order(&mut self, order: &Order) -> Result<Order> {
    let tables = self.writable(FailPoint::CreateOrder)?;
    if tables.orders.contains_key(&order.id) {
      return Err(CommerceError::StoreFault(format!("duplicate order id {}", order.id)));
    }
    tables.orders.insert(order.id, order.clone());
    Ok(order.clone())
  }

  async fn get_order(&mut self, order_id: Uuid) -> Result<Option<Order>> {
    Ok(self.open()?.orders.get(&order_id).cloned())
  }

  async fn update_order_status(&mut self, order_id: Uuid, status: OrderStatus) -> Result<Order> {
    let tables = self.writable(FailPoint::UpdateOrderStatus)?;
    let order = tables
      .orders
      .get_mut(&order_id)
      .ok_or_else(|| CommerceError::not_found("order", order_id))?;
    order.status = status;
    order.updated_at = Utc::now();
    Ok(order.clone())
  }

  async fn create_order_items(&mut self, items: &[OrderItem]) -> Result<()> {
    self.writable(FailPoint::CreateOrderItems)?.order_items.extend_from_slice(items);
    Ok(())
  }

  async fn list_order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> {
    let tables = self.open()?;
    Ok(tables.order_items.iter().filter(|i| i.order_id == order_id).cloned().collect())
  }

  async fn create_payment(&mut self, payment: &Payment) -> Result<Payment> {
    let tables = self.writable(FailPoint::CreatePayment)?;
    if tables.payment_of(payment.order_id).is_some() {
      return Err(CommerceError::StoreFault(format!(
        "order {} already has a payment",
        payment.order_id
      )));
    }
    tables.payments.insert(payment.id, payment.clone());
    Ok(payment.clone())
  }

  async fn update_payment(&mut self, payment: &Payment) -> Result<Payment> {
    let tables = self.writable(FailPoint::UpdatePayment)?;
    let stored = tables
      .payments
      .get_mut(&payment.id)
      .ok_or_else(|| CommerceError::not_found("payment", payment.id))?;
    stored.status = payment.status;
    stored.gateway = payment.gateway;
    stored.intent_id = payment.intent_id.clone();
    stored.client_secret = payment.client_secret.clone();
    stored.refund_id = payment.refund_id.clone();
    stored.updated_at = Utc::now();
    Ok(stored.clone())
  }

  async fn get_payment_by_order_id(&mut self, order_id: Uuid) -> Result<Option<Payment>> {
    Ok(self.open()?.payment_of(order_id).cloned())
  }

  async fn get_payment_by_intent_id(&mut self, intent_id: &str) -> Result<Option<Payment>> {
    let tables = self.open()?;
    Ok(
      tables
        .payments
        .values()
        .find(|p| p.intent_id.as_deref() == Some(intent_id))
        .cloned(),
    )
  }

  async fn commit(&mut self) -> Result<()> {
    let mut guard = self
      .guard
      .take()
      .ok_or_else(|| CommerceError::StoreFault("transaction already finished".to_string()))?;
    // A failed commit discards the working copy, like a dropped connection.
    self.check(FailPoint::Commit)?;
    *guard = std::mem::take(&mut self.working);
    event!(Level::DEBUG, "Memory transaction committed.");
    Ok(())
  }

  async fn rollback(&mut self) -> Result<()> {
    if self.guard.take().is_some() {
      self.working = Tables::default();
      event!(Level::DEBUG, "Memory transaction rolled back.");
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn variant(stock: i32) -> ProductVariant {
    ProductVariant {
      id: Uuid::new_v4(),
      product_name: "Mug".to_string(),
      sku: "MUG-1".to_string(),
      price_cents: 1_500,
      stock,
      attributes: serde_json::json!({"color": "red"}),
      updated_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn commit_publishes_and_rollback_discards() {
    let store = MemoryStore::new();
    let v = variant(5);
    let id = v.id;
    store.seed(|t| t.variants.insert(id, v)).await;

    let tx = store.begin().await.unwrap();
    assert_eq!(tx.lock().await.adjust_variant_stock(id, -2).await.unwrap(), 3);
    tx.lock().await.rollback().await.unwrap();
    assert_eq!(store.snapshot().await.variants[&id].stock, 5);

    let tx = store.begin().await.unwrap();
    tx.lock().await.adjust_variant_stock(id, -2).await.unwrap();
    tx.lock().await.commit().await.unwrap();
    assert_eq!(store.snapshot().await.variants[&id].stock, 3);
  }

  #[tokio::test]
  async fn dropped_transaction_releases_the_store() {
    let store = MemoryStore::new();
    let v = variant(1);
    let id = v.id;
    store.seed(|t| t.variants.insert(id, v)).await;

    {
      let tx = store.begin().await.unwrap();
      tx.lock().await.adjust_variant_stock(id, -1).await.unwrap();
    }
    assert_eq!(store.snapshot().await.variants[&id].stock, 1);
  }

  #[tokio::test]
  async fn stock_never_goes_negative() {
    let store = MemoryStore::new();
    let v = variant(2);
    let id = v.id;
    store.seed(|t| t.variants.insert(id, v)).await;

    let tx = store.begin().await.unwrap();
    let err = tx.lock().await.adjust_variant_stock(id, -3).await.unwrap_err();
    assert!(matches!(
      err,
      CommerceError::InsufficientStock {
        requested: 3,
        available: 2,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn finished_transaction_rejects_operations() {
    let store = MemoryStore::new();
    let tx = store.begin().await.unwrap();
    tx.lock().await.commit().await.unwrap();
    let err = tx.lock().await.get_order(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CommerceError::StoreFault(_)));
    tx.lock().await.rollback().await.unwrap();
  }

  #[tokio::test]
  async fn fail_points_trigger_until_cleared() {
    let store = MemoryStore::new();
    store.fail_on(FailPoint::CreateOrderItems);

    let tx = store.begin().await.unwrap();
    let err = tx.lock().await.create_order_items(&[]).await.unwrap_err();
    assert!(matches!(err, CommerceError::StoreFault(_)));

    store.clear_faults();
    tx.lock().await.create_order_items(&[]).await.unwrap();
  }
}
