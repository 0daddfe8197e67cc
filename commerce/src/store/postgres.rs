// commerce/src/store/postgres.rs

//! PostgreSQL store over a `sqlx` pool. One `sqlx::Transaction` per run.
//! Rows an orchestrator is about to change are read with `FOR UPDATE` so
//! concurrent runs on the same cart, order or payment serialize.

use crate::config::DatabaseConfig;
use crate::errors::{CommerceError, Result};
use crate::models::{
  Cart, CartItem, CartStatus, Customer, Discount, DiscountUsage, Order, OrderItem, OrderStatus, Payment,
  ProductVariant,
};
use crate::store::{Store, StoreTx, TxHandle};
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::{event, info, instrument, Level};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, customer_id, street, ward, district, city, phone, total_cents, discount_cents, \
                             status, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, order_id, amount_cents, method, gateway, intent_id, client_secret, status, \
                               refund_id, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  #[instrument(name = "PgStore::connect", skip_all, fields(max_connections = config.max_connections))]
  pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
    let pool = PgPoolOptions::new()
      .max_connections(config.max_connections)
      .acquire_timeout(config.acquire_timeout)
      .connect(&config.url)
      .await
      .map_err(|e| {
        event!(Level::ERROR, error = %e, "Failed to connect to the database.");
        CommerceError::Store(e)
      })?;
    info!("Successfully connected to the database.");
    Ok(Self { pool })
  }

  pub fn from_pool(pool: PgPool) -> Self {
    Self { pool }
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }

  /// Applies the embedded migrations under `commerce/migrations`.
  pub async fn migrate(&self) -> Result<()> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    info!("Database migrations applied.");
    Ok(())
  }

  pub async fn close(&self) {
    self.pool.close().await;
  }
}

#[async_trait]
impl Store for PgStore {
  async fn begin(&self) -> Result<TxHandle> {
    let tx = self.pool.begin().await?;
    Ok(TxHandle::new(Box::new(PgTx { tx: Some(tx) })))
  }
}

/// Dropping an unfinished `PgTx` rolls back through `sqlx::Transaction`'s
/// own drop.
pub struct PgTx {
  tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
  fn conn(&mut self) -> Result<&mut PgConnection> {
    self
      .tx
      .as_deref_mut()
      .ok_or_else(|| CommerceError::StoreFault("transaction already finished".to_string()))
  }
}

#[async_trait]
impl StoreTx for PgTx {
  async fn get_customer(&mut self, customer_id: Uuid) -> Result<Option<Customer>> {
    let customer = sqlx::query_as::<_, Customer>("SELECT id, email, created_at FROM customers WHERE id = $1")
      .bind(customer_id)
      .fetch_optional(self.conn()?)
      .await?;
    Ok(customer)
  }

  async fn get_cart(&mut self, cart_id: Uuid) -> Result<Option<Cart>> {
    let cart = sqlx::query_as::<_, Cart>(
      "SELECT id, customer_id, status, created_at, updated_at FROM carts WHERE id = $1 FOR UPDATE",
    )
    .bind(cart_id)
    .fetch_optional(self.conn()?)
    .await?;
    Ok(cart)
  }

  async fn list_cart_items(&mut self, cart_id: Uuid) -> Result<Vec<CartItem>> {
    let items = sqlx::query_as::<_, CartItem>(
      "SELECT id, cart_id, variant_id, quantity, price_cents, added_at FROM cart_items \
       WHERE cart_id = $1 ORDER BY added_at, id",
    )
    .bind(cart_id)
    .fetch_all(self.conn()?)
    .await?;
    Ok(items)
  }

  async fn clear_cart(&mut self, cart_id: Uuid) -> Result<()> {
    let conn = self.conn()?;
    sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
      .bind(cart_id)
      .execute(&mut *conn)
      .await?;
    let updated = sqlx::query("UPDATE carts SET status = $2, updated_at = now() WHERE id = $1")
      .bind(cart_id)
      .bind(CartStatus::CheckedOut)
      .execute(&mut *conn)
      .await?;
    if updated.rows_affected() == 0 {
      return Err(CommerceError::not_found("cart", cart_id));
    }
    Ok(())
  }

  async fn get_variant(&mut self, variant_id: Uuid) -> Result<Option<ProductVariant>> {
    let variant = sqlx::query_as::<_, ProductVariant>(
      "SELECT id, product_name, sku, price_cents, stock, attributes, updated_at FROM product_variants WHERE id = $1",
    )
    .bind(variant_id)
    .fetch_optional(self.conn()?)
    .await?;
    Ok(variant)
  }

  async fn adjust_variant_stock(&mut self, variant_id: Uuid, delta: i32) -> Result<i32> {
    let conn = self.conn()?;
    let updated = sqlx::query_scalar::<_, i32>(
      "UPDATE product_variants SET stock = stock + $2, updated_at = now() \
       WHERE id = $1 AND stock + $2 >= 0 RETURNING stock",
    )
    .bind(variant_id)
    .bind(delta)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(stock) = updated {
      return Ok(stock);
    }

    let available = sqlx::query_scalar::<_, i32>("SELECT stock FROM product_variants WHERE id = $1")
      .bind(variant_id)
      .fetch_optional(&mut *conn)
      .await?;
    match available {
      Some(available) => Err(CommerceError::InsufficientStock {
        variant_id,
        requested: delta.saturating_neg(),
        available,
      }),
      None => Err(CommerceError::not_found("product variant", variant_id)),
    }
  }

  async fn get_discount(&mut self, discount_id: Uuid) -> Result<Option<Discount>> {
    let discount = sqlx::query_as::<_, Discount>(
      "SELECT id, code, kind, value, max_discount_cents, min_order_cents, usage_limit, per_customer_limit, \
       starts_at, ends_at, is_active, created_at FROM discounts WHERE id = $1 FOR UPDATE",
    )
    .bind(discount_id)
    .fetch_optional(self.conn()?)
    .await?;
    Ok(discount)
  }

  async fn count_discount_usage(&mut self, discount_id: Uuid, customer_id: Option<Uuid>) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
      "SELECT COUNT(*) FROM discount_usages WHERE discount_id = $1 AND ($2::uuid IS NULL OR customer_id = $2)",
    )
    .bind(discount_id)
    .bind(customer_id)
    .fetch_one(self.conn()?)
    .await?;
    Ok(count)
  }

  async fn insert_discount_usage(&mut self, usage: &DiscountUsage) -> Result<()> {
    sqlx::query(
      "INSERT INTO discount_usages (id, discount_id, order_id, customer_id, amount_cents, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(usage.id)
    .bind(usage.discount_id)
    .bind(usage.order_id)
    .bind(usage.customer_id)
    .bind(usage.amount_cents)
    .bind(usage.created_at)
    .execute(self.conn()?)
    .await?;
    Ok(())
  }

  async fn list_discount_usage_for_order(&mut self, order_id: Uuid) -> Result<Vec<DiscountUsage>> {
    let usages = sqlx::query_as::<_, DiscountUsage>(
      "SELECT id, discount_id, order_id, customer_id, amount_cents, created_at FROM discount_usages \
       WHERE order_id = $1 ORDER BY created_at, id",
    )
    .bind(order_id)
    .fetch_all(self.conn()?)
    .await?;
    Ok(usages)
  }

  async fn create_order(&mut self, order: &Order) -> Result<Order> {
    let sql = format!(
      "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
       RETURNING {ORDER_COLUMNS}"
    );
    let created = sqlx::query_as::<_, Order>(&sql)
      .bind(order.id)
      .bind(order.customer_id)
      .bind(&order.shipping.street)
      .bind(&order.shipping.ward)
      .bind(&order.shipping.district)
      .bind(&order.shipping.city)
      .bind(&order.shipping.phone)
      .bind(order.total_cents)
      .bind(order.discount_cents)
      .bind(order.status)
      .bind(order.created_at)
      .bind(order.updated_at)
      .fetch_one(self.conn()?)
      .await?;
    Ok(created)
  }

  async fn get_order(&mut self, order_id: Uuid) -> Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
    let order = sqlx::query_as::<_, Order>(&sql)
      .bind(order_id)
      .fetch_optional(self.conn()?)
      .await?;
    Ok(order)
  }

  async fn update_order_status(&mut self, order_id: Uuid, status: OrderStatus) -> Result<Order> {
    let sql = format!("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 RETURNING {ORDER_COLUMNS}");
    sqlx::query_as::<_, Order>(&sql)
      .bind(order_id)
      .bind(status)
      .fetch_optional(self.conn()?)
      .await?
      .ok_or_else(|| CommerceError::not_found("order", order_id))
  }

  async fn create_order_items(&mut self, items: &[OrderItem]) -> Result<()> {
    if items.is_empty() {
      return Ok(());
    }
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
      "INSERT INTO order_items (id, order_id, variant_id, quantity, unit_price_cents, line_total_cents, \
       product_name, sku, attributes) ",
    );
    builder.push_values(items, |mut row, item| {
      row
        .push_bind(item.id)
        .push_bind(item.order_id)
        .push_bind(item.variant_id)
        .push_bind(item.quantity)
        .push_bind(item.unit_price_cents)
        .push_bind(item.line_total_cents)
        .push_bind(item.product_name.clone())
        .push_bind(item.sku.clone())
        .push_bind(item.attributes.clone());
    });
    builder.build().execute(self.conn()?).await?;
    event!(Level::DEBUG, count = items.len(), "Order items inserted.");
    Ok(())
  }

  async fn list_order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> {
    let items = sqlx::query_as::<_, OrderItem>(
      "SELECT id, order_id, variant_id, quantity, unit_price_cents, line_total_cents, product_name, sku, \
       attributes FROM order_items WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(self.conn()?)
    .await?;
    Ok(items)
  }

  async fn create_payment(&mut self, payment: &Payment) -> Result<Payment> {
    let sql = format!(
      "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
       RETURNING {PAYMENT_COLUMNS}"
    );
    let created = sqlx::query_as::<_, Payment>(&sql)
      .bind(payment.id)
      .bind(payment.order_id)
      .bind(payment.amount_cents)
      .bind(payment.method)
      .bind(payment.gateway)
      .bind(&payment.intent_id)
      .bind(&payment.client_secret)
      .bind(payment.status)
      .bind(&payment.refund_id)
      .bind(payment.created_at)
      .bind(payment.updated_at)
      .fetch_one(self.conn()?)
      .await?;
    Ok(created)
  }

  async fn update_payment(&mut self, payment: &Payment) -> Result<Payment> {
    let sql = format!(
      "UPDATE payments SET status = $2, gateway = $3, intent_id = $4, client_secret = $5, refund_id = $6, \
       updated_at = now() WHERE id = $1 RETURNING {PAYMENT_COLUMNS}"
    );
    sqlx::query_as::<_, Payment>(&sql)
      .bind(payment.id)
      .bind(payment.status)
      .bind(payment.gateway)
      .bind(&payment.intent_id)
      .bind(&payment.client_secret)
      .bind(&payment.refund_id)
      .fetch_optional(self.conn()?)
      .await?
      .ok_or_else(|| CommerceError::not_found("payment", payment.id))
  }

  async fn get_payment_by_order_id(&mut self, order_id: Uuid) -> Result<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 FOR UPDATE");
    let payment = sqlx::query_as::<_, Payment>(&sql)
      .bind(order_id)
      .fetch_optional(self.conn()?)
      .await?;
    Ok(payment)
  }

  async fn get_payment_by_intent_id(&mut self, intent_id: &str) -> Result<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE intent_id = $1 FOR UPDATE");
    let payment = sqlx::query_as::<_, Payment>(&sql)
      .bind(intent_id)
      .fetch_optional(self.conn()?)
      .await?;
    Ok(payment)
  }

  async fn commit(&mut self) -> Result<()> {
    let tx = self
      .tx
      .take()
      .ok_or_else(|| CommerceError::StoreFault("transaction already finished".to_string()))?;
    tx.commit().await?;
    Ok(())
  }

  async fn rollback(&mut self) -> Result<()> {
    if let Some(tx) = self.tx.take() {
      tx.rollback().await?;
    }
    Ok(())
  }
}
