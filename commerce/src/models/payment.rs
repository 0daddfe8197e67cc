// commerce/src/models/payment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
  Pending,
  /// Only reached through a gateway event; no orchestrator sets it.
  Processing,
  Success,
  Failed,
  Cancelled,
  Refunded,
}

impl PaymentStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      PaymentStatus::Pending => "pending",
      PaymentStatus::Processing => "processing",
      PaymentStatus::Success => "success",
      PaymentStatus::Failed => "failed",
      PaymentStatus::Cancelled => "cancelled",
      PaymentStatus::Refunded => "refunded",
    }
  }

  pub fn can_transition_to(self, next: PaymentStatus) -> bool {
    use PaymentStatus::*;
    matches!(
      (self, next),
      (Pending, Processing)
        | (Pending, Success)
        | (Pending, Failed)
        | (Pending, Cancelled)
        | (Processing, Success)
        | (Processing, Failed)
        | (Processing, Cancelled)
        | (Success, Refunded)
    )
  }

  /// Money has been captured.
  pub fn is_captured(self) -> bool {
    matches!(self, PaymentStatus::Success | PaymentStatus::Refunded)
  }

  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded
    )
  }
}

impl fmt::Display for PaymentStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
  Card,
  Cod,
  Wallet,
  BankTransfer,
  Postpaid,
}

impl PaymentMethod {
  pub fn as_str(self) -> &'static str {
    match self {
      PaymentMethod::Card => "card",
      PaymentMethod::Cod => "cod",
      PaymentMethod::Wallet => "wallet",
      PaymentMethod::BankTransfer => "bank_transfer",
      PaymentMethod::Postpaid => "postpaid",
    }
  }
}

impl fmt::Display for PaymentMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Payment providers the orchestrators can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_gateway", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
  Stripe,
  Paypal,
}

impl Gateway {
  pub fn as_str(self) -> &'static str {
    match self {
      Gateway::Stripe => "stripe",
      Gateway::Paypal => "paypal",
    }
  }
}

impl fmt::Display for Gateway {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Gateway {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "stripe" => Ok(Gateway::Stripe),
      "paypal" => Ok(Gateway::Paypal),
      other => Err(format!("unknown payment gateway '{}'", other)),
    }
  }
}

/// The payment of an order. `gateway` and `intent_id` are absent for offline
/// and zero-amount payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Payment {
  pub id: Uuid,
  pub order_id: Uuid,
  pub amount_cents: i64,
  pub method: PaymentMethod,
  pub gateway: Option<Gateway>,
  pub intent_id: Option<String>,
  pub client_secret: Option<String>,
  pub status: PaymentStatus,
  pub refund_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
