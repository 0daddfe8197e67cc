// commerce/src/errors.rs

use crate::models::{Gateway, OrderStatus, PaymentStatus};
use orderflow::FlowError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CommerceError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Resource Not Found: {entity} {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("Cart {cart_id} has no items")]
  EmptyCart { cart_id: Uuid },

  #[error("Insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
  InsufficientStock {
    variant_id: Uuid,
    requested: i32,
    available: i32,
  },

  #[error("Discount {discount_id} cannot be applied: {reason}")]
  DiscountUnavailable { discount_id: Uuid, reason: String },

  /// Captured money leaves through a refund, never through a cancellation.
  #[error("Payment {payment_id} is already captured ({status}); refund the order instead")]
  PaymentAlreadyCaptured { payment_id: Uuid, status: PaymentStatus },

  #[error("Payment of order {order_id} is not settled (status: {})", .status.map_or("none", PaymentStatus::as_str))]
  PaymentNotSettled {
    order_id: Uuid,
    status: Option<PaymentStatus>,
  },

  #[error("Order {order_id} is {actual}, expected {expected}")]
  InvalidOrderState {
    order_id: Uuid,
    actual: OrderStatus,
    expected: String,
  },

  #[error("Payment Gateway Error ({gateway}): {message}")]
  Gateway { gateway: Gateway, message: String },

  #[error("No adapter configured for payment gateway {0}")]
  GatewayNotConfigured(Gateway),

  #[error("Database Error: {0}")]
  Store(#[from] sqlx::Error),

  #[error("Migration Error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  /// A failure raised by a store that is not a database error, e.g. an
  /// injected fault or a closed transaction.
  #[error("Store Fault: {0}")]
  StoreFault(String),

  #[error("Workflow Error: {source}")]
  Workflow {
    #[from]
    source: FlowError,
  },

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Internal Error: {0}")]
  Internal(String),
}

impl CommerceError {
  pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
    CommerceError::NotFound {
      entity,
      id: id.to_string(),
    }
  }

  pub fn gateway(gateway: Gateway, message: impl Into<String>) -> Self {
    CommerceError::Gateway {
      gateway,
      message: message.into(),
    }
  }
}

impl From<anyhow::Error> for CommerceError {
  fn from(err: anyhow::Error) -> Self {
    let err = match err.downcast::<CommerceError>() {
      Ok(commerce_err) => return commerce_err,
      Err(err) => err,
    };
    match err.downcast::<sqlx::Error>() {
      Ok(sqlx_err) => CommerceError::Store(sqlx_err),
      Err(err) => CommerceError::Internal(format!("{:#}", err)),
    }
  }
}

pub type Result<T, E = CommerceError> = std::result::Result<T, E>;
