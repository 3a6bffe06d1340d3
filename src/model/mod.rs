// src/model/mod.rs

//! Settings, project model and build listeners.

pub mod build_model;
pub mod controller;
pub mod listener;

pub use build_model::{
    BuildModel, IncludedTask, ProjectModel, Settings, TaskSpec, resolve_task_path,
};
pub use controller::{BuildModelController, DefaultBuildModelController};
pub use listener::{BuildListener, BuildListenerBroadcast, BuildResult};
