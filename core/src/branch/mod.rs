// orderflow/src/branch/mod.rs

//! Conditional execution of sub-pipelines inside a step of a root pipeline.
//! Each branch pairs a condition over the root context with a sub-pipeline
//! and an extractor producing that sub-pipeline's own `ContextData`.

pub mod builder;
pub(crate) mod scope;

pub use builder::{BranchBuilder, PendingBranch};
