// src/workgraph/mod.rs

//! Work graphs.
//!
//! A build contributes tasks to a run through its [`BuildWorkGraph`]. Tasks
//! needed by other builds are exported as [`ExportedTaskNode`]s, and the
//! [`BuildTreeWorkGraph`] schedules and runs the graphs of every
//! participating build together.

pub mod exported;
pub mod graph;
pub mod tree_graph;

pub use exported::{ExportedTaskNode, NodeLifecycle, TaskState};
pub use graph::{BuildWorkGraph, BuildWorkGraphController, DetachedWorkGraph};
pub use tree_graph::BuildTreeWorkGraph;
