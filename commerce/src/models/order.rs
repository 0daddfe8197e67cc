// commerce/src/models/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of an order.
///
/// `pending → {confirmed, cancelled}`, `confirmed → {processing, shipped, cancelled}`,
/// `processing → shipped`, `shipped → delivered`, `delivered → refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
  Pending,
  Confirmed,
  Processing,
  Shipped,
  Delivered,
  Cancelled,
  Refunded,
}

impl OrderStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      OrderStatus::Pending => "pending",
      OrderStatus::Confirmed => "confirmed",
      OrderStatus::Processing => "processing",
      OrderStatus::Shipped => "shipped",
      OrderStatus::Delivered => "delivered",
      OrderStatus::Cancelled => "cancelled",
      OrderStatus::Refunded => "refunded",
    }
  }

  pub fn can_transition_to(self, next: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
      (self, next),
      (Pending, Confirmed)
        | (Pending, Cancelled)
        | (Confirmed, Processing)
        | (Confirmed, Shipped)
        | (Confirmed, Cancelled)
        | (Processing, Shipped)
        | (Shipped, Delivered)
        | (Delivered, Refunded)
    )
  }

  /// No transition leaves a terminal status.
  pub fn is_terminal(self) -> bool {
    matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Delivery address copied into the order at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ShippingSnapshot {
  pub street: String,
  pub ward: String,
  pub district: String,
  pub city: String,
  pub phone: String,
}

impl ShippingSnapshot {
  /// Names of the fields that are blank.
  pub fn missing_fields(&self) -> Vec<&'static str> {
    [
      ("street", &self.street),
      ("ward", &self.ward),
      ("district", &self.district),
      ("city", &self.city),
      ("phone", &self.phone),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| name)
    .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Order {
  pub id: Uuid,
  pub customer_id: Uuid,
  #[sqlx(flatten)]
  pub shipping: ShippingSnapshot,
  /// Sum of the line totals, before discounts.
  pub total_cents: i64,
  pub discount_cents: i64,
  pub status: OrderStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
