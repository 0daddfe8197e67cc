// commerce/src/compensation.rs

//! Gateway-side compensation used by the cancel and refund orchestrators.
//!
//! The orchestrators never talk to a provider directly when reversing a
//! payment; the caller hands them a `PaymentCompensator`, which makes them
//! testable with a scripted implementation.

use crate::errors::{CommerceError, Result};
use crate::gateway::GatewayRegistry;
use crate::models::{Gateway, Payment};
use async_trait::async_trait;
use tracing::{info, instrument};

#[async_trait]
pub trait PaymentCompensator: Send + Sync {
  /// Voids a payment that has not been captured.
  async fn cancel_payment(&self, payment: &Payment) -> Result<()>;

  /// Returns captured money. `Ok(None)` when the provider issues no refund id.
  async fn refund_payment(&self, payment: &Payment) -> Result<Option<String>>;
}

/// Compensates through the adapter registered for the payment's gateway.
#[derive(Debug, Clone)]
pub struct GatewayCompensator {
  gateways: GatewayRegistry,
}

impl GatewayCompensator {
  pub fn new(gateways: GatewayRegistry) -> Self {
    Self { gateways }
  }
}

fn gateway_ref(payment: &Payment) -> Result<(Gateway, &str)> {
  match (payment.gateway, payment.intent_id.as_deref()) {
    (Some(gateway), Some(intent_id)) => Ok((gateway, intent_id)),
    _ => Err(CommerceError::Internal(format!(
      "payment {} has no gateway intent to compensate",
      payment.id
    ))),
  }
}

#[async_trait]
impl PaymentCompensator for GatewayCompensator {
  #[instrument(skip_all, fields(payment_id = %payment.id, gateway = ?payment.gateway))]
  async fn cancel_payment(&self, payment: &Payment) -> Result<()> {
    let (gateway, intent_id) = gateway_ref(payment)?;
    self.gateways.get(gateway)?.cancel(intent_id, "requested_by_customer").await?;
    info!(intent_id, "Gateway intent cancelled.");
    Ok(())
  }

  #[instrument(skip_all, fields(payment_id = %payment.id, gateway = ?payment.gateway))]
  async fn refund_payment(&self, payment: &Payment) -> Result<Option<String>> {
    let (gateway, intent_id) = gateway_ref(payment)?;
    let refund_id = self
      .gateways
      .get(gateway)?
      .refund(intent_id, payment.amount_cents, "requested_by_customer")
      .await?;
    info!(intent_id, ?refund_id, "Gateway refund issued.");
    Ok(refund_id)
  }
}
