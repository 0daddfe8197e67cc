// orderflow/src/lib.rs

//! orderflow: an async, type-safe step-pipeline engine.
//!
//! A pipeline is an ordered list of named steps over a shared
//! `ContextData<T>`. It supports:
//!  - `before`/`on`/`after` handlers per step, optional steps and skip conditions.
//!  - Early stop through `StepControl::Stop`.
//!  - Branching steps that run one of several sub-pipelines over an extracted sub-context.
//!  - Transactional runs: `run_atomic` commits a `TransactionBoundary` when the
//!    run completes and rolls it back when it stops or fails.
//!  - A registry that dispatches a context to the pipeline registered for its type.

pub mod branch;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod transaction;

pub use crate::branch::{BranchBuilder, PendingBranch};
pub use crate::core::context_data::ContextData;
pub use crate::core::control::{FlowOutcome, StepControl};
pub use crate::core::handler::{Handler, HandlerFuture};
pub use crate::core::step::{SkipCondition, StepDef};
pub use crate::error::{FlowError, FlowResult};
pub use crate::pipeline::Pipeline;
pub use crate::registry::FlowRegistry;
pub use crate::transaction::{finish_transaction, TransactionBoundary};
