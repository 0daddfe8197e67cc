// commerce/src/gateway/simulated.rs

//! In-process payment provider for local runs and tests.

use crate::errors::{CommerceError, Result};
use crate::gateway::{GatewayPaymentStatus, IntentHandle, PaymentGateway};
use crate::models::Gateway;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Calls that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
  CreateIntent,
  Cancel,
  Refund,
  GetStatus,
}

#[derive(Debug, Clone)]
struct SimulatedIntent {
  order_id: Uuid,
  amount_cents: i64,
  status: GatewayPaymentStatus,
}

#[derive(Default)]
struct State {
  intents: HashMap<String, SimulatedIntent>,
  queued_intent_ids: VecDeque<String>,
  failing: HashSet<GatewayOp>,
  calls: HashMap<GatewayOp, usize>,
  refunds_without_id: bool,
}

pub struct SimulatedGateway {
  gateway: Gateway,
  latency: Option<Duration>,
  state: Mutex<State>,
}

impl SimulatedGateway {
  pub fn new(gateway: Gateway) -> Self {
    Self {
      gateway,
      latency: None,
      state: Mutex::new(State::default()),
    }
  }

  /// Sleeps this long inside every call.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// The next `create_intent` returns this id instead of a generated one.
  pub fn queue_intent_id(&self, intent_id: impl Into<String>) {
    self.state.lock().queued_intent_ids.push_back(intent_id.into());
  }

  pub fn fail(&self, op: GatewayOp) {
    self.state.lock().failing.insert(op);
  }

  pub fn recover(&self, op: GatewayOp) {
    self.state.lock().failing.remove(&op);
  }

  /// Refunds succeed but return no refund id, like synchronous providers.
  pub fn omit_refund_ids(&self) {
    self.state.lock().refunds_without_id = true;
  }

  pub fn calls(&self, op: GatewayOp) -> usize {
    self.state.lock().calls.get(&op).copied().unwrap_or(0)
  }

  pub fn total_calls(&self) -> usize {
    self.state.lock().calls.values().sum()
  }

  /// Marks an intent as captured, as if the customer completed payment.
  pub fn settle(&self, intent_id: &str) -> Result<()> {
    self.set_status(intent_id, GatewayPaymentStatus::Succeeded)
  }

  pub fn set_status(&self, intent_id: &str, status: GatewayPaymentStatus) -> Result<()> {
    let mut state = self.state.lock();
    let intent = state
      .intents
      .get_mut(intent_id)
      .ok_or_else(|| CommerceError::gateway(self.gateway, format!("unknown intent {}", intent_id)))?;
    intent.status = status;
    Ok(())
  }

  pub fn intent_status(&self, intent_id: &str) -> Option<GatewayPaymentStatus> {
    self.state.lock().intents.get(intent_id).map(|i| i.status)
  }

  pub fn intent_order(&self, intent_id: &str) -> Option<Uuid> {
    self.state.lock().intents.get(intent_id).map(|i| i.order_id)
  }

  /// Counts the call and fails it if `op` is switched to failing.
  async fn enter(&self, op: GatewayOp) -> Result<()> {
    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
    let mut state = self.state.lock();
    *state.calls.entry(op).or_insert(0) += 1;
    if state.failing.contains(&op) {
      warn!(gateway = %self.gateway, ?op, "Simulated gateway failure.");
      return Err(CommerceError::gateway(self.gateway, format!("simulated {:?} failure", op)));
    }
    Ok(())
  }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
  fn gateway(&self) -> Gateway {
    self.gateway
  }

  #[instrument(skip(self, customer_email), fields(gateway = %self.gateway))]
  async fn create_intent(&self, order_id: Uuid, amount_cents: i64, customer_email: &str) -> Result<IntentHandle> {
    self.enter(GatewayOp::CreateIntent).await?;
    if amount_cents <= 0 {
      return Err(CommerceError::gateway(self.gateway, "amount must be greater than zero"));
    }

    let mut state = self.state.lock();
    let intent_id = state
      .queued_intent_ids
      .pop_front()
      .unwrap_or_else(|| format!("pi_{}", Uuid::new_v4().simple()));
    let client_secret = format!("{}_secret_{}", intent_id, Uuid::new_v4().simple());
    state.intents.insert(
      intent_id.clone(),
      SimulatedIntent {
        order_id,
        amount_cents,
        status: GatewayPaymentStatus::RequiresAction,
      },
    );
    info!(intent_id = %intent_id, "Simulated payment intent created.");
    Ok(IntentHandle {
      intent_id,
      client_secret: Some(client_secret),
    })
  }

  #[instrument(skip(self), fields(gateway = %self.gateway))]
  async fn cancel(&self, intent_id: &str, reason: &str) -> Result<()> {
    self.enter(GatewayOp::Cancel).await?;
    let mut state = self.state.lock();
    let intent = state
      .intents
      .get_mut(intent_id)
      .ok_or_else(|| CommerceError::gateway(self.gateway, format!("unknown intent {}", intent_id)))?;
    match intent.status {
      GatewayPaymentStatus::Succeeded | GatewayPaymentStatus::Refunded => Err(CommerceError::gateway(
        self.gateway,
        format!("intent {} is already captured", intent_id),
      )),
      _ => {
        intent.status = GatewayPaymentStatus::Canceled;
        info!(intent_id, "Simulated payment intent cancelled.");
        Ok(())
      }
    }
  }

  #[instrument(skip(self), fields(gateway = %self.gateway))]
  async fn refund(&self, intent_id: &str, amount_cents: i64, reason: &str) -> Result<Option<String>> {
    self.enter(GatewayOp::Refund).await?;
    let mut state = self.state.lock();
    let without_id = state.refunds_without_id;
    let intent = state
      .intents
      .get_mut(intent_id)
      .ok_or_else(|| CommerceError::gateway(self.gateway, format!("unknown intent {}", intent_id)))?;
    if intent.status != GatewayPaymentStatus::Succeeded {
      return Err(CommerceError::gateway(
        self.gateway,
        format!("intent {} is not captured", intent_id),
      ));
    }
    if amount_cents > intent.amount_cents {
      return Err(CommerceError::gateway(
        self.gateway,
        format!("refund of {} exceeds captured {}", amount_cents, intent.amount_cents),
      ));
    }
    intent.status = GatewayPaymentStatus::Refunded;
    let refund_id = (!without_id).then(|| format!("re_{}", Uuid::new_v4().simple()));
    info!(intent_id, ?refund_id, "Simulated refund issued.");
    Ok(refund_id)
  }

  async fn get_status(&self, intent_id: &str) -> Result<GatewayPaymentStatus> {
    self.enter(GatewayOp::GetStatus).await?;
    self
      .intent_status(intent_id)
      .ok_or_else(|| CommerceError::gateway(self.gateway, format!("unknown intent {}", intent_id)))
  }
}
