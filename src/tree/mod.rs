// src/tree/mod.rs

//! The build tree.
//!
//! - `path.rs`: identity paths and build identifiers.
//! - `projects.rs`: per-project mutable state and its registries.
//! - `build_state.rs`: the builds of a tree and the services they own.
//! - `registry.rs`: lookup of builds by identifier and name.
//! - `build_tree.rs`: the tree-scoped entry point.

pub mod build_state;
pub mod build_tree;
pub mod path;
pub mod projects;
pub mod registry;

pub use build_state::{
    BuildServices, BuildState, IncludedBuildState, RootBuildState, TreeServices,
};
pub use build_tree::{BuildTree, PlannedBuild};
pub use path::{BuildIdentifier, Path};
pub use projects::{BuildProjectRegistry, ProjectLifecycle, ProjectState, ProjectStateRegistry};
pub use registry::BuildStateRegistry;
