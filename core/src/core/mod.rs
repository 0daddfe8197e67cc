pub mod context_data;
pub mod control;
pub mod handler;
pub mod step;

pub use context_data::ContextData;
pub use control::{FlowOutcome, StepControl};
pub use handler::{Handler, HandlerFuture};
pub use step::{SkipCondition, StepDef};
