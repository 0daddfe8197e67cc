// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use orderflow::{ContextData, FlowError, StepControl, TransactionBoundary};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::Level;

#[derive(Clone, Debug, Default)]
pub struct TestContext {
  pub counter: i32,
  pub message: String,
  pub steps_executed: Vec<String>,
  pub should_stop_at: Option<String>,
  pub route: Option<String>,
  pub sub_result: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct SubContextA {
  pub input: String,
  pub output: String,
}

#[derive(Clone, Debug, Default)]
pub struct SubContextB {
  pub input: String,
  pub output: String,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  /// Engine errors, kept as their debug string so tests can compare.
  #[error("orderflow error: {0}")]
  Flow(String),

  #[error("Test handler failed: {0}")]
  Handler(String),

  #[error("Boundary failed: {0}")]
  Boundary(String),
}

impl From<FlowError> for TestError {
  fn from(fe: FlowError) -> Self {
    TestError::Flow(format!("{:?}", fe))
  }
}

impl From<BoundaryError> for TestError {
  fn from(be: BoundaryError) -> Self {
    TestError::Boundary(be.to_string())
  }
}

pub fn create_simple_handler(
  step_name: &'static str,
  message_to_append: &'static str,
) -> orderflow::Handler<TestContext, TestError> {
  Box::new(move |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      let mut guard = ctx.write();
      guard.counter += 1;
      guard.message.push_str(message_to_append);
      guard.steps_executed.push(step_name.to_string());
      tracing::debug!(target: "test_handlers", step = step_name, counter = guard.counter, "executed");
      if guard.should_stop_at.as_deref() == Some(step_name) {
        return Ok(StepControl::Stop);
      }
      Ok(StepControl::Continue)
    })
  })
}

pub fn create_failing_handler(
  step_name: &'static str,
  error_message: &'static str,
) -> orderflow::Handler<TestContext, TestError> {
  Box::new(move |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      ctx.write().steps_executed.push(step_name.to_string());
      tracing::warn!(target: "test_handlers", step = step_name, "failing with: '{}'", error_message);
      Err(TestError::Handler(error_message.to_string()))
    })
  })
}

use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BoundaryError(pub String);

/// Counts commit and rollback calls. `fail_commit` makes the next commit fail.
#[derive(Default)]
pub struct RecordingBoundary {
  pub commits: AtomicUsize,
  pub rollbacks: AtomicUsize,
  pub fail_commit: AtomicBool,
  pub fail_rollback: AtomicBool,
}

impl RecordingBoundary {
  pub fn commits(&self) -> usize {
    self.commits.load(Ordering::SeqCst)
  }

  pub fn rollbacks(&self) -> usize {
    self.rollbacks.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl TransactionBoundary for RecordingBoundary {
  type Error = BoundaryError;

  async fn commit(&self) -> Result<(), BoundaryError> {
    if self.fail_commit.load(Ordering::SeqCst) {
      return Err(BoundaryError("commit refused".to_string()));
    }
    self.commits.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn rollback(&self) -> Result<(), BoundaryError> {
    self.rollbacks.fetch_add(1, Ordering::SeqCst);
    if self.fail_rollback.load(Ordering::SeqCst) {
      return Err(BoundaryError("rollback refused".to_string()));
    }
    Ok(())
  }
}
