// commerce/src/models/discount.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "discount_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
  /// `value` is in basis points (1/100 of a percent).
  Percentage,
  /// `value` is in cents.
  Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Discount {
  pub id: Uuid,
  pub code: String,
  pub kind: DiscountKind,
  pub value: i64,
  /// Upper bound on the amount a percentage discount may take off.
  pub max_discount_cents: Option<i64>,
  pub min_order_cents: i64,
  /// Total uses across all customers.
  pub usage_limit: Option<i32>,
  pub per_customer_limit: Option<i32>,
  pub starts_at: Option<DateTime<Utc>>,
  pub ends_at: Option<DateTime<Utc>>,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
}

impl Discount {
  /// Checks every constraint except the amount itself. `Err` carries the
  /// reason the discount cannot be applied.
  pub fn check_available(
    &self,
    now: DateTime<Utc>,
    order_total_cents: i64,
    uses_total: i64,
    uses_by_customer: i64,
  ) -> Result<(), String> {
    if !self.is_active {
      return Err("discount is not active".to_string());
    }
    if self.starts_at.is_some_and(|starts| now < starts) {
      return Err("discount has not started yet".to_string());
    }
    if self.ends_at.is_some_and(|ends| now >= ends) {
      return Err("discount has expired".to_string());
    }
    if let Some(limit) = self.usage_limit {
      if uses_total >= i64::from(limit) {
        return Err(format!("usage limit of {} reached", limit));
      }
    }
    if let Some(limit) = self.per_customer_limit {
      if uses_by_customer >= i64::from(limit) {
        return Err(format!("per-customer limit of {} reached", limit));
      }
    }
    if order_total_cents < self.min_order_cents {
      return Err(format!(
        "order total {} is below the minimum of {}",
        order_total_cents, self.min_order_cents
      ));
    }
    Ok(())
  }

  /// Amount this discount takes off `order_total_cents`, before clamping
  /// against other discounts.
  pub fn amount_for(&self, order_total_cents: i64) -> i64 {
    let raw = match self.kind {
      DiscountKind::Fixed => self.value,
      DiscountKind::Percentage => {
        let off = i128::from(order_total_cents) * i128::from(self.value) / 10_000;
        let off = i64::try_from(off).unwrap_or(i64::MAX);
        match self.max_discount_cents {
          Some(cap) => off.min(cap),
          None => off,
        }
      }
    };
    raw.max(0)
  }
}

/// Splits the requested amounts so their sum never exceeds `order_total_cents`.
/// Earlier selections are served first; a selection that finds nothing left
/// gets zero.
pub fn allocate_discounts(order_total_cents: i64, requested: &[(Uuid, i64)]) -> Vec<(Uuid, i64)> {
  let mut remaining = order_total_cents.max(0);
  requested
    .iter()
    .map(|(id, amount)| {
      let granted = (*amount).clamp(0, remaining);
      remaining -= granted;
      (*id, granted)
    })
    .collect()
}

/// One row per (order, discount, customer) with a positive applied amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DiscountUsage {
  pub id: Uuid,
  pub discount_id: Uuid,
  pub order_id: Uuid,
  pub customer_id: Uuid,
  pub amount_cents: i64,
  pub created_at: DateTime<Utc>,
}
