// commerce/src/models/order_item.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One purchased variant of an order. Name, sku, price and attributes are
/// copied from the variant at checkout and never change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
  pub id: Uuid,
  pub order_id: Uuid,
  pub variant_id: Uuid,
  pub quantity: i32,
  pub unit_price_cents: i64,
  pub line_total_cents: i64,
  pub product_name: String,
  pub sku: String,
  pub attributes: serde_json::Value,
}
