// src/lifecycle/mod.rs

//! Build lifecycle.
//!
//! [`BuildLifecycleController`] drives one build through
//! `Created -> Configure -> TaskGraph -> Finished`, delegating model
//! realization to a [`BuildModelController`](crate::model::BuildModelController),
//! plan population to a [`BuildWorkPreparer`] and plan execution to a
//! [`BuildWorkExecutor`].

pub mod controller;
pub mod preparer;

pub use controller::{BuildLifecycleController, LifecycleState};
pub use preparer::{BuildWorkPreparer, DefaultBuildWorkPreparer, OperationFiringWorkPreparer};

use crate::plan::FinalizedExecutionPlan;
use crate::result::ExecutionResult;

/// Executes a finalized plan to completion.
pub trait BuildWorkExecutor: Send + Sync {
    fn execute(&self, plan: &mut FinalizedExecutionPlan) -> ExecutionResult<()>;
}

/// A build-scoped service released when the build is stopped.
pub trait Stoppable: Send + Sync {
    fn stop(&self) -> anyhow::Result<()>;
}
