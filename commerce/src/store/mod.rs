// commerce/src/store/mod.rs

//! The transactional store seam.
//!
//! Every orchestrator run opens one transaction through `Store::begin` and
//! performs all of its row operations on the returned `TxHandle`. The handle
//! doubles as the `TransactionBoundary` of the run, so the engine commits it
//! when the pipeline completes and rolls it back otherwise.

pub mod memory;
pub mod postgres;

pub use memory::{FailPoint, MemoryStore};
pub use postgres::PgStore;

use crate::errors::{CommerceError, Result};
use crate::models::{
  Cart, CartItem, Customer, Discount, DiscountUsage, Order, OrderItem, OrderStatus, Payment, ProductVariant,
};
use async_trait::async_trait;
use orderflow::TransactionBoundary;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
  async fn begin(&self) -> Result<TxHandle>;
}

/// Row operations scoped to one open transaction. After `commit` or
/// `rollback` every further call fails with `CommerceError::StoreFault`.
#[async_trait]
pub trait StoreTx: Send {
  async fn get_customer(&mut self, customer_id: Uuid) -> Result<Option<Customer>>;

  async fn get_cart(&mut self, cart_id: Uuid) -> Result<Option<Cart>>;
  async fn list_cart_items(&mut self, cart_id: Uuid) -> Result<Vec<CartItem>>;
  /// Removes the cart's items and retires the cart.
  async fn clear_cart(&mut self, cart_id: Uuid) -> Result<()>;

  async fn get_variant(&mut self, variant_id: Uuid) -> Result<Option<ProductVariant>>;
  /// Adds `delta` to the variant's stock and returns the new level. Fails
  /// with `InsufficientStock` instead of going below zero.
  async fn adjust_variant_stock(&mut self, variant_id: Uuid, delta: i32) -> Result<i32>;

  async fn get_discount(&mut self, discount_id: Uuid) -> Result<Option<Discount>>;
  /// Usage rows of a discount, optionally restricted to one customer.
  async fn count_discount_usage(&mut self, discount_id: Uuid, customer_id: Option<Uuid>) -> Result<i64>;
  async fn insert_discount_usage(&mut self, usage: &DiscountUsage) -> Result<()>;
  async fn list_discount_usage_for_order(&mut self, order_id: Uuid) -> Result<Vec<DiscountUsage>>;

  async fn create_order(&mut self, order: &Order) -> Result<Order>;
  async fn get_order(&mut self, order_id: Uuid) -> Result<Option<Order>>;
  async fn update_order_status(&mut self, order_id: Uuid, status: OrderStatus) -> Result<Order>;

  async fn create_order_items(&mut self, items: &[OrderItem]) -> Result<()>;
  async fn list_order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>>;

  async fn create_payment(&mut self, payment: &Payment) -> Result<Payment>;
  /// Writes status, gateway, intent id, client secret and refund id.
  async fn update_payment(&mut self, payment: &Payment) -> Result<Payment>;
  async fn get_payment_by_order_id(&mut self, order_id: Uuid) -> Result<Option<Payment>>;
  async fn get_payment_by_intent_id(&mut self, intent_id: &str) -> Result<Option<Payment>>;

  async fn commit(&mut self) -> Result<()>;
  async fn rollback(&mut self) -> Result<()>;
}

/// Shared handle to one open transaction.
///
/// Pipeline contexts carry a clone. Handlers clone the handle out of the
/// context, release the context guard, then `lock().await` the transaction.
/// Dropping the last handle without committing rolls the transaction back.
#[derive(Clone)]
pub struct TxHandle {
  inner: Arc<Mutex<Box<dyn StoreTx>>>,
}

impl TxHandle {
  pub fn new(tx: Box<dyn StoreTx>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(tx)),
    }
  }

  /// Exclusive access to the transaction for one or more row operations.
  pub async fn lock(&self) -> MutexGuard<'_, Box<dyn StoreTx>> {
    self.inner.lock().await
  }
}

impl std::fmt::Debug for TxHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TxHandle").finish_non_exhaustive()
  }
}

#[async_trait]
impl TransactionBoundary for TxHandle {
  type Error = CommerceError;

  async fn commit(&self) -> Result<()> {
    self.lock().await.commit().await
  }

  async fn rollback(&self) -> Result<()> {
    self.lock().await.rollback().await
  }
}
