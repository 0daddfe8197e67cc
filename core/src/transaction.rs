// orderflow/src/transaction.rs

//! Binding a pipeline run to a transaction: commit on `Completed`, roll back
//! on `Stopped` or error.

use crate::core::control::FlowOutcome;
use async_trait::async_trait;
use tracing::{event, Level};

/// The commit/rollback half of a transaction whose row operations are
/// performed by handlers during the run.
#[async_trait]
pub trait TransactionBoundary: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  async fn commit(&self) -> Result<(), Self::Error>;

  async fn rollback(&self) -> Result<(), Self::Error>;
}

/// Closes `boundary` according to the result of a run.
///
/// A failed commit turns a completed run into an error. A failed rollback is
/// logged and the run's own outcome (stop or original error) is returned.
pub async fn finish_transaction<B, Err>(
  result: Result<FlowOutcome, Err>,
  boundary: &B,
) -> Result<FlowOutcome, Err>
where
  B: TransactionBoundary + ?Sized,
  Err: std::error::Error + From<B::Error>,
{
  match result {
    Ok(FlowOutcome::Completed) => {
      boundary.commit().await.map_err(|e| {
        event!(Level::ERROR, error = %e, "Commit failed after a completed run.");
        Err::from(e)
      })?;
      event!(Level::DEBUG, "Transaction committed.");
      Ok(FlowOutcome::Completed)
    }
    Ok(FlowOutcome::Stopped) => {
      if let Err(e) = boundary.rollback().await {
        event!(Level::ERROR, error = %e, "Rollback failed after a stopped run.");
      } else {
        event!(Level::INFO, "Run stopped; transaction rolled back.");
      }
      Ok(FlowOutcome::Stopped)
    }
    Err(run_err) => {
      if let Err(e) = boundary.rollback().await {
        event!(Level::ERROR, error = %e, run_error = %run_err, "Rollback failed after a failed run.");
      } else {
        event!(Level::INFO, run_error = %run_err, "Run failed; transaction rolled back.");
      }
      Err(run_err)
    }
  }
}
