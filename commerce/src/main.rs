// commerce/src/main.rs

//! Applies the database migrations and exits.

use commerce::{telemetry, CommerceConfig, CommerceError, PgStore};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = CommerceConfig::from_env()?;
  telemetry::init(config.log_json)?;

  let result = migrate(&config).await;
  if let Err(e) = &result {
    error!(error = %e, "Migration run failed.");
  }
  Ok(result?)
}

async fn migrate(config: &CommerceConfig) -> Result<(), CommerceError> {
  let database = config
    .database
    .as_ref()
    .ok_or_else(|| CommerceError::Config("DATABASE_URL must be set to run migrations".to_string()))?;

  info!("Connecting to the database...");
  let store = PgStore::connect(database).await?;
  let migrated = store.migrate().await;
  store.close().await;
  migrated?;
  info!("Database is up to date.");
  Ok(())
}
