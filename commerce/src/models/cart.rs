// commerce/src/models/cart.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "cart_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
  Active,
  /// Retired by a successful checkout. The row is kept, its items are gone.
  CheckedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Cart {
  pub id: Uuid,
  pub customer_id: Uuid,
  pub status: CartStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CartItem {
  pub id: Uuid,
  pub cart_id: Uuid,
  pub variant_id: Uuid,
  pub quantity: i32,
  /// Price seen when the item was added. Checkout reprices from the variant.
  pub price_cents: i64,
  pub added_at: DateTime<Utc>,
}
