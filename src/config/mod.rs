// src/config/mod.rs

//! Build tree definitions.
//!
//! - `model.rs`: the TOML-backed data model, raw and validated.
//! - `loader.rs`: reading a definition from disk.
//! - `validate.rs`: `TryFrom<RawBuildTreeConfig> for BuildTreeConfig`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    BuildDefinition, BuildTreeConfig, IncludedTaskRef, ProjectDefinition, RawBuildDefinition,
    RawBuildTreeConfig, TaskDefinition, TreeOptions, TreeSection,
};
