// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{BuildTreeConfig, RawBuildTreeConfig};
use crate::errors::Result;

/// Load a build tree definition from a given path and return the raw form.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (references, cycles, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawBuildTreeConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawBuildTreeConfig> {
    let config: RawBuildTreeConfig = toml::from_str(contents)?;
    Ok(config)
}

/// Load a build tree definition from path and validate it:
///
/// - at least one root project, `max_workers >= 1`,
/// - every `after` and `included` reference resolves,
/// - no task graph cycles, including across builds.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<BuildTreeConfig> {
    let raw = load_from_path(&path)?;
    BuildTreeConfig::try_from(raw)
}

/// `BuildTree.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("BuildTree.toml")
}
