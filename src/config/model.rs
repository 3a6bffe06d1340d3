// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::plan::DetailLevel;
use crate::tree::Path;

/// Top-level build tree definition as read from a TOML file.
///
/// ```toml
/// [tree]
/// max_workers = 4
///
/// [root]
/// name = "app"
/// requested_tasks = ["build"]
///
/// [root.projects.":".tasks.build]
/// after = ["compile"]
/// included = [{ build = "lib", task = ":jar" }]
///
/// [included.lib.projects.":".tasks.jar]
/// cmd = "echo jar"
/// ```
///
/// This is the unvalidated form; see [`BuildTreeConfig`] for the checked one.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBuildTreeConfig {
    #[serde(default)]
    pub tree: TreeSection,

    pub root: RawBuildDefinition,

    /// Included builds, keyed by build name.
    #[serde(default)]
    pub included: BTreeMap<String, RawBuildDefinition>,
}

/// `[tree]` section. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default)]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub detail_level: DetailLevel,
}

fn default_max_workers() -> usize {
    4
}

impl Default for TreeSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            continue_on_failure: false,
            detail_level: DetailLevel::default(),
        }
    }
}

/// `[root]` or `[included.<name>]`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawBuildDefinition {
    /// Defaults to the key for included builds and to `"root"` for the root.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub requested_tasks: Vec<String>,

    #[serde(default)]
    pub excluded_tasks: Vec<String>,

    /// Keyed by absolute project path (`":"`, `":core"`).
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectDefinition>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectDefinition {
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskDefinition>,
}

/// `[...projects.<path>.tasks.<name>]`.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TaskDefinition {
    /// Tasks that must run first: a task name in the same project, or an
    /// absolute task path in the same build.
    #[serde(default)]
    pub after: Vec<String>,

    /// Shell command to run. Tasks without one succeed immediately.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Transform steps that produce this task's inputs, in order.
    #[serde(default)]
    pub transforms: Vec<String>,

    /// Tasks of included builds that must run first.
    #[serde(default)]
    pub included: Vec<IncludedTaskRef>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IncludedTaskRef {
    pub build: String,
    pub task: String,
}

/// Validated tree definition.
#[derive(Debug, Clone)]
pub struct BuildTreeConfig {
    pub options: TreeOptions,
    pub root: BuildDefinition,
    pub included: BTreeMap<String, BuildDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeOptions {
    pub max_workers: usize,
    pub continue_on_failure: bool,
    pub detail_level: DetailLevel,
}

impl Default for TreeOptions {
    fn default() -> Self {
        TreeSection::default().into()
    }
}

impl From<TreeSection> for TreeOptions {
    fn from(section: TreeSection) -> Self {
        Self {
            max_workers: section.max_workers,
            continue_on_failure: section.continue_on_failure,
            detail_level: section.detail_level,
        }
    }
}

/// One build of the tree, with project paths parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDefinition {
    pub name: String,
    pub requested_tasks: Vec<String>,
    pub excluded_tasks: Vec<String>,
    pub projects: BTreeMap<Path, ProjectDefinition>,
}

impl BuildDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
