// commerce/src/gateway/mod.rs

//! The payment gateway capability.
//!
//! Orchestrators only ever see `dyn PaymentGateway`, looked up by the
//! `Gateway` recorded on the payment. Provider SDKs live behind adapters.

pub mod simulated;

pub use simulated::{GatewayOp, SimulatedGateway};

use crate::errors::{CommerceError, Result};
use crate::models::{Gateway, PaymentStatus};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// What a provider hands back when an intent is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentHandle {
  pub intent_id: String,
  /// Needed by the client to confirm the payment; some providers have none.
  pub client_secret: Option<String>,
}

/// Provider-side state of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
  RequiresAction,
  Processing,
  Succeeded,
  Failed,
  Canceled,
  Refunded,
}

impl GatewayPaymentStatus {
  /// The local payment status this provider state corresponds to. `None`
  /// while the customer still has to act.
  pub fn to_local(self) -> Option<PaymentStatus> {
    match self {
      GatewayPaymentStatus::RequiresAction => None,
      GatewayPaymentStatus::Processing => Some(PaymentStatus::Processing),
      GatewayPaymentStatus::Succeeded => Some(PaymentStatus::Success),
      GatewayPaymentStatus::Failed => Some(PaymentStatus::Failed),
      GatewayPaymentStatus::Canceled => Some(PaymentStatus::Cancelled),
      GatewayPaymentStatus::Refunded => Some(PaymentStatus::Refunded),
    }
  }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
  fn gateway(&self) -> Gateway;

  async fn create_intent(&self, order_id: Uuid, amount_cents: i64, customer_email: &str) -> Result<IntentHandle>;

  async fn cancel(&self, intent_id: &str, reason: &str) -> Result<()>;

  /// Returns the provider's refund id, when it issues one.
  async fn refund(&self, intent_id: &str, amount_cents: i64, reason: &str) -> Result<Option<String>>;

  async fn get_status(&self, intent_id: &str) -> Result<GatewayPaymentStatus>;
}

/// Adapters keyed by gateway.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
  adapters: BTreeMap<Gateway, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `adapter` under its own `gateway()`, replacing any previous one.
  pub fn with(mut self, adapter: Arc<dyn PaymentGateway>) -> Self {
    self.insert(adapter);
    self
  }

  pub fn insert(&mut self, adapter: Arc<dyn PaymentGateway>) {
    self.adapters.insert(adapter.gateway(), adapter);
  }

  pub fn get(&self, gateway: Gateway) -> Result<Arc<dyn PaymentGateway>> {
    self
      .adapters
      .get(&gateway)
      .cloned()
      .ok_or(CommerceError::GatewayNotConfigured(gateway))
  }

  pub fn gateways(&self) -> impl Iterator<Item = Gateway> + '_ {
    self.adapters.keys().copied()
  }
}

impl std::fmt::Debug for GatewayRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list().entries(self.adapters.keys()).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lookup_of_missing_adapter_fails() {
    let registry = GatewayRegistry::new().with(Arc::new(SimulatedGateway::new(Gateway::Stripe)));
    assert!(registry.get(Gateway::Stripe).is_ok());
    assert!(matches!(
      registry.get(Gateway::Paypal),
      Err(CommerceError::GatewayNotConfigured(Gateway::Paypal))
    ));
    assert_eq!(registry.gateways().collect::<Vec<_>>(), vec![Gateway::Stripe]);
  }

  #[test]
  fn provider_states_map_to_local_statuses() {
    assert_eq!(GatewayPaymentStatus::RequiresAction.to_local(), None);
    assert_eq!(
      GatewayPaymentStatus::Succeeded.to_local(),
      Some(PaymentStatus::Success)
    );
    assert_eq!(
      GatewayPaymentStatus::Canceled.to_local(),
      Some(PaymentStatus::Cancelled)
    );
  }
}
