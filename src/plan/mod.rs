// src/plan/mod.rs

//! Execution plans.
//!
//! - [`execution_plan`]: the mutable plan filled in during work graph
//!   population, and the [`WorkGraphBuilder`] handed to population actions.
//! - [`finalized`]: the pure, synchronous scheduling core.
//! - [`executor`]: the async shell that runs a finalized plan.
//! - [`node_executor`]: backends that run a single node.
//! - [`planned`]: the read-only reporting view.

pub mod execution_plan;
pub mod executor;
pub mod finalized;
pub mod node;
pub mod node_executor;
pub mod planned;

pub use execution_plan::{ExecutionPlan, IncludedTaskResolver, WorkGraphBuilder};
pub use executor::PlanExecutor;
pub use finalized::{FinalizedExecutionPlan, NodeState, NodeTransition};
pub use node::{NodeIdentity, NodeType, NodeWork, ScheduledNode};
pub use node_executor::{CommandNodeExecutor, NodeExecutor};
pub use planned::{DetailLevel, PlannedNode, PlannedNodeGraph, PlannedTask, TaskIdentity};
