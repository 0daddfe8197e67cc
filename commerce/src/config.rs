// commerce/src/config.rs

use crate::errors::{CommerceError, Result};
use crate::models::{Gateway, PaymentMethod};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Which gateway, if any, collects each payment method. Methods without a
/// gateway are settled offline (cash on delivery, invoices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentRouting {
  pub card: Option<Gateway>,
  pub wallet: Option<Gateway>,
  pub bank_transfer: Option<Gateway>,
}

impl Default for PaymentRouting {
  fn default() -> Self {
    Self {
      card: Some(Gateway::Stripe),
      wallet: Some(Gateway::Paypal),
      bank_transfer: None,
    }
  }
}

impl PaymentRouting {
  pub fn gateway_for(&self, method: PaymentMethod) -> Option<Gateway> {
    match method {
      PaymentMethod::Card => self.card,
      PaymentMethod::Wallet => self.wallet,
      PaymentMethod::BankTransfer => self.bank_transfer,
      PaymentMethod::Cod | PaymentMethod::Postpaid => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
  pub url: String,
  pub max_connections: u32,
  pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CommerceConfig {
  /// `None` when `DATABASE_URL` is unset; only the in-memory store is usable.
  pub database: Option<DatabaseConfig>,
  pub routing: PaymentRouting,
  pub log_json: bool,
}

impl CommerceConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();
    let config = Self::from_lookup(|name| env::var(name).ok())?;
    tracing::info!(
      database = config.database.is_some(),
      card_gateway = ?config.routing.card,
      wallet_gateway = ?config.routing.wallet,
      bank_transfer_gateway = ?config.routing.bank_transfer,
      "Configuration loaded."
    );
    Ok(config)
  }

  /// Builds the configuration from any variable source.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let database = match get("DATABASE_URL") {
      Some(url) => {
        let max_connections = parse_or(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 5u32)?;
        if max_connections == 0 {
          return Err(CommerceError::Config(
            "DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
          ));
        }
        let acquire_timeout_secs = parse_or(
          get("DATABASE_ACQUIRE_TIMEOUT_SECS"),
          "DATABASE_ACQUIRE_TIMEOUT_SECS",
          5u64,
        )?;
        Some(DatabaseConfig {
          url,
          max_connections,
          acquire_timeout: Duration::from_secs(acquire_timeout_secs),
        })
      }
      None => None,
    };

    let defaults = PaymentRouting::default();
    let routing = PaymentRouting {
      card: parse_gateway(get("CARD_GATEWAY"), "CARD_GATEWAY", defaults.card)?,
      wallet: parse_gateway(get("WALLET_GATEWAY"), "WALLET_GATEWAY", defaults.wallet)?,
      bank_transfer: parse_gateway(get("BANK_TRANSFER_GATEWAY"), "BANK_TRANSFER_GATEWAY", defaults.bank_transfer)?,
    };

    let log_json = parse_or(get("LOG_JSON"), "LOG_JSON", false)?;

    Ok(Self {
      database,
      routing,
      log_json,
    })
  }
}

fn parse_or<T>(raw: Option<String>, name: &str, default: T) -> Result<T>
where
  T: std::str::FromStr,
  T::Err: std::fmt::Display,
{
  match raw {
    None => Ok(default),
    Some(value) => value
      .parse::<T>()
      .map_err(|e| CommerceError::Config(format!("Invalid {} value '{}': {}", name, value, e))),
  }
}

/// `none` disables the gateway for that method.
fn parse_gateway(raw: Option<String>, name: &str, default: Option<Gateway>) -> Result<Option<Gateway>> {
  match raw {
    None => Ok(default),
    Some(value) if value.eq_ignore_ascii_case("none") => Ok(None),
    Some(value) => value
      .parse::<Gateway>()
      .map(Some)
      .map_err(|e| CommerceError::Config(format!("Invalid {}: {}", name, e))),
  }
}
