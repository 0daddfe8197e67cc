// commerce/src/models/product.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A sellable variant with its current price and stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProductVariant {
  pub id: Uuid,
  pub product_name: String,
  pub sku: String,
  pub price_cents: i64,
  pub stock: i32,
  pub attributes: serde_json::Value,
  pub updated_at: DateTime<Utc>,
}
