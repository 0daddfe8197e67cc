// commerce/src/pipelines/checkout_pipeline.rs

//! Cart → order, order items, discount usage and payment, in one transaction.

use crate::errors::{CommerceError, Result};
use crate::models::{allocate_discounts, CartStatus, DiscountUsage, Order, OrderItem, OrderStatus};
use crate::pipelines::contexts::{AppliedDiscount, CheckoutCtxData};
use crate::pipelines::{common_steps, settlement};
use chrono::Utc;
use orderflow::{ContextData, FlowRegistry, Pipeline, SkipCondition, StepControl};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{event, info, instrument, Level};
use uuid::Uuid;

pub const STEP_LOAD_CART: &str = "load_cart";
pub const STEP_SNAPSHOT_ITEMS: &str = "snapshot_items";
pub const STEP_RESERVE_STOCK: &str = "reserve_stock";
pub const STEP_APPLY_DISCOUNTS: &str = "apply_discounts";
pub const STEP_CREATE_ORDER: &str = "create_order";
pub const STEP_CREATE_ORDER_ITEMS: &str = "create_order_items";
pub const STEP_RECORD_DISCOUNT_USAGE: &str = "record_discount_usage";
pub const STEP_CLEAR_CART: &str = "clear_cart";

fn without_granted_discounts() -> SkipCondition<CheckoutCtxData> {
  Arc::new(|ctx: ContextData<CheckoutCtxData>| ctx.read().applied_discounts.iter().all(|d| d.amount_cents == 0))
}

pub fn build_checkout_pipeline() -> Pipeline<CheckoutCtxData, CommerceError> {
  let mut p = Pipeline::<CheckoutCtxData, CommerceError>::new(&[
    (STEP_LOAD_CART, false, None),
    (STEP_SNAPSHOT_ITEMS, false, None),
    (STEP_RESERVE_STOCK, false, None),
    (STEP_APPLY_DISCOUNTS, false, None),
    (STEP_CREATE_ORDER, false, None),
    (STEP_CREATE_ORDER_ITEMS, false, None),
    (STEP_RECORD_DISCOUNT_USAGE, false, Some(without_granted_discounts())),
    (STEP_CLEAR_CART, false, None),
  ])
  .named("checkout");

  p.on_step(STEP_LOAD_CART, load_cart);
  p.on_step(STEP_SNAPSHOT_ITEMS, snapshot_items);
  p.on_step(STEP_RESERVE_STOCK, reserve_stock);
  p.on_step(STEP_APPLY_DISCOUNTS, apply_discounts);
  p.on_step(STEP_CREATE_ORDER, create_order);
  p.on_step(STEP_CREATE_ORDER_ITEMS, create_order_items);
  p.on_step(STEP_RECORD_DISCOUNT_USAGE, record_discount_usage);
  p.on_step(STEP_CLEAR_CART, clear_cart);

  settlement::attach_settlement_step(&mut p);
  p
}

pub fn register_checkout_pipeline(registry: &FlowRegistry<CommerceError>) {
  registry.register(build_checkout_pipeline());
}

#[instrument(name = "checkout::load_cart", skip_all, err(Display))]
async fn load_cart(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let (tx, cart_id, customer_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.request.cart_id, guard.request.customer_id)
  };

  let mut store = tx.lock().await;
  // Someone else's cart is reported as missing.
  let cart = store
    .get_cart(cart_id)
    .await?
    .filter(|cart| cart.customer_id == customer_id)
    .ok_or_else(|| CommerceError::not_found("cart", cart_id))?;
  if cart.status != CartStatus::Active {
    return Err(CommerceError::Validation(format!(
      "cart {} has already been checked out",
      cart_id
    )));
  }
  let cart_items = store.list_cart_items(cart_id).await?;
  if cart_items.is_empty() {
    return Err(CommerceError::EmptyCart { cart_id });
  }
  let customer = store
    .get_customer(customer_id)
    .await?
    .ok_or_else(|| CommerceError::not_found("customer", customer_id))?;
  drop(store);

  info!(%cart_id, lines = cart_items.len(), "Cart loaded for checkout.");
  let mut guard = ctx.write();
  guard.customer_email = Some(customer.email);
  guard.cart_items = cart_items;
  Ok(StepControl::Continue)
}

/// Prices every line from the variant as it is now, not from the cart copy.
#[instrument(name = "checkout::snapshot_items", skip_all, err(Display))]
async fn snapshot_items(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let (tx, order_id, cart_items) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.order_id, guard.cart_items.clone())
  };

  let mut store = tx.lock().await;
  let mut items = Vec::with_capacity(cart_items.len());
  let mut total_cents: i64 = 0;
  for line in &cart_items {
    if line.quantity <= 0 {
      return Err(CommerceError::Validation(format!(
        "cart item {} has non-positive quantity {}",
        line.id, line.quantity
      )));
    }
    let variant = store
      .get_variant(line.variant_id)
      .await?
      .ok_or_else(|| CommerceError::not_found("product variant", line.variant_id))?;
    let line_total_cents = variant
      .price_cents
      .checked_mul(i64::from(line.quantity))
      .ok_or_else(|| CommerceError::Validation(format!("line total of variant {} overflows", variant.id)))?;
    total_cents = total_cents
      .checked_add(line_total_cents)
      .ok_or_else(|| CommerceError::Validation("order total overflows".to_string()))?;

    items.push(OrderItem {
      id: Uuid::new_v4(),
      order_id,
      variant_id: variant.id,
      quantity: line.quantity,
      unit_price_cents: variant.price_cents,
      line_total_cents,
      product_name: variant.product_name,
      sku: variant.sku,
      attributes: variant.attributes,
    });
  }
  drop(store);

  event!(Level::DEBUG, %order_id, total_cents, "Order items snapshotted.");
  let mut guard = ctx.write();
  guard.items = items;
  guard.total_cents = total_cents;
  Ok(StepControl::Continue)
}

/// Takes the ordered quantities out of stock. Cancellation puts them back.
#[instrument(name = "checkout::reserve_stock", skip_all, err(Display))]
async fn reserve_stock(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let (tx, wanted) = {
    let guard = ctx.read();
    (guard.tx.clone(), common_steps::units_per_variant(&guard.items)?)
  };

  let mut store = tx.lock().await;
  for (variant_id, quantity) in wanted {
    let left = store.adjust_variant_stock(variant_id, -quantity).await?;
    event!(Level::DEBUG, %variant_id, quantity, left, "Stock reserved.");
  }
  Ok(StepControl::Continue)
}

/// Validates every selected discount and clamps their sum to the order
/// total, granting in selection order. Rows are locked in id order so
/// concurrent checkouts sharing discounts cannot deadlock.
#[instrument(name = "checkout::apply_discounts", skip_all, err(Display))]
async fn apply_discounts(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let (tx, discount_ids, customer_id, total_cents) = {
    let guard = ctx.read();
    (
      guard.tx.clone(),
      guard.request.discount_ids.clone(),
      guard.request.customer_id,
      guard.total_cents,
    )
  };
  if discount_ids.is_empty() {
    return Ok(StepControl::Continue);
  }

  let mut lock_order = discount_ids.clone();
  lock_order.sort_unstable();
  let mut store = tx.lock().await;
  let mut locked = BTreeMap::new();
  for discount_id in lock_order {
    let discount = store
      .get_discount(discount_id)
      .await?
      .ok_or_else(|| CommerceError::not_found("discount", discount_id))?;
    locked.insert(discount_id, discount);
  }

  let now = Utc::now();
  let mut requested = Vec::with_capacity(discount_ids.len());
  for discount_id in discount_ids {
    let discount = locked
      .remove(&discount_id)
      .ok_or_else(|| CommerceError::Validation(format!("discount {} selected twice", discount_id)))?;
    let uses_total = store.count_discount_usage(discount_id, None).await?;
    let uses_by_customer = store.count_discount_usage(discount_id, Some(customer_id)).await?;
    discount
      .check_available(now, total_cents, uses_total, uses_by_customer)
      .map_err(|reason| CommerceError::DiscountUnavailable { discount_id, reason })?;
    requested.push((discount_id, discount.amount_for(total_cents)));
  }
  drop(store);

  let applied: Vec<AppliedDiscount> = allocate_discounts(total_cents, &requested)
    .into_iter()
    .map(|(discount_id, amount_cents)| AppliedDiscount {
      discount_id,
      amount_cents,
    })
    .collect();
  let discount_cents: i64 = applied.iter().map(|d| d.amount_cents).sum();
  info!(total_cents, discount_cents, "Discounts applied.");

  let mut guard = ctx.write();
  guard.applied_discounts = applied;
  guard.discount_cents = discount_cents;
  Ok(StepControl::Continue)
}

#[instrument(name = "checkout::create_order", skip_all, err(Display))]
async fn create_order(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let (tx, draft) = {
    let guard = ctx.read();
    let now = Utc::now();
    let draft = Order {
      id: guard.order_id,
      customer_id: guard.request.customer_id,
      shipping: guard.request.shipping.clone(),
      total_cents: guard.total_cents,
      discount_cents: guard.discount_cents,
      status: OrderStatus::Pending,
      created_at: now,
      updated_at: now,
    };
    (guard.tx.clone(), draft)
  };

  let order = tx.lock().await.create_order(&draft).await?;
  info!(order_id = %order.id, total_cents = order.total_cents, "Order created.");
  ctx.write().order = Some(order);
  Ok(StepControl::Continue)
}

#[instrument(name = "checkout::create_order_items", skip_all, err(Display))]
async fn create_order_items(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let (tx, items) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.items.clone())
  };
  tx.lock().await.create_order_items(&items).await?;
  event!(Level::DEBUG, count = items.len(), "Order items created.");
  Ok(StepControl::Continue)
}

#[instrument(name = "checkout::record_discount_usage", skip_all, err(Display))]
async fn record_discount_usage(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let (tx, usages) = {
    let guard = ctx.read();
    let now = Utc::now();
    let usages: Vec<DiscountUsage> = guard
      .applied_discounts
      .iter()
      .filter(|d| d.amount_cents > 0)
      .map(|d| DiscountUsage {
        id: Uuid::new_v4(),
        discount_id: d.discount_id,
        order_id: guard.order_id,
        customer_id: guard.request.customer_id,
        amount_cents: d.amount_cents,
        created_at: now,
      })
      .collect();
    (guard.tx.clone(), usages)
  };

  let mut store = tx.lock().await;
  for usage in &usages {
    store.insert_discount_usage(usage).await?;
  }
  event!(Level::DEBUG, count = usages.len(), "Discount usage recorded.");
  Ok(StepControl::Continue)
}

#[instrument(name = "checkout::clear_cart", skip_all, err(Display))]
async fn clear_cart(ctx: ContextData<CheckoutCtxData>) -> Result<StepControl> {
  let (tx, cart_id) = {
    let guard = ctx.read();
    (guard.tx.clone(), guard.request.cart_id)
  };
  tx.lock().await.clear_cart(cart_id).await?;
  event!(Level::DEBUG, %cart_id, "Cart cleared.");
  Ok(StepControl::Continue)
}
