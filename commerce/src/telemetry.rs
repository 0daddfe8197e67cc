// commerce/src/telemetry.rs

use crate::errors::{CommerceError, Result};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` filter. Fails if a subscriber is already installed.
pub fn init(json: bool) -> Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);

  let installed = if json {
    builder.json().try_init()
  } else {
    builder.try_init()
  };
  installed.map_err(|e| CommerceError::Config(format!("Failed to install tracing subscriber: {}", e)))
}
