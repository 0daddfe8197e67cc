// orderflow/src/core/control.rs

//! Flow-control signals returned by handlers, and the outcome of a whole run.

/// Returned by every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
  /// Keep going: remaining handlers of this step, then the next step.
  Continue,
  /// Halt the run here. No further handlers execute.
  Stop,
}

/// Outcome of `Pipeline::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
  /// Every step that was not skipped ran to the end.
  Completed,
  /// A handler returned `StepControl::Stop`.
  Stopped,
}

impl FlowOutcome {
  pub fn is_completed(self) -> bool {
    matches!(self, FlowOutcome::Completed)
  }
}
