#![allow(dead_code)]

use std::collections::BTreeMap;

use buildtree::config::{
    BuildTreeConfig, IncludedTaskRef, ProjectDefinition, RawBuildDefinition, RawBuildTreeConfig,
    TaskDefinition, TreeSection,
};
use buildtree::plan::DetailLevel;

/// Builder for `BuildTreeConfig` to simplify test setup.
pub struct BuildTreeConfigBuilder {
    config: RawBuildTreeConfig,
}

impl BuildTreeConfigBuilder {
    pub fn new(root: BuildDefinitionBuilder) -> Self {
        Self {
            config: RawBuildTreeConfig {
                tree: TreeSection::default(),
                root: root.build(),
                included: BTreeMap::new(),
            },
        }
    }

    pub fn include(mut self, name: &str, build: BuildDefinitionBuilder) -> Self {
        self.config.included.insert(name.to_string(), build.build());
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.tree.max_workers = workers;
        self
    }

    pub fn continue_on_failure(mut self, val: bool) -> Self {
        self.config.tree.continue_on_failure = val;
        self
    }

    pub fn detail_level(mut self, level: DetailLevel) -> Self {
        self.config.tree.detail_level = level;
        self
    }

    pub fn raw(self) -> RawBuildTreeConfig {
        self.config
    }

    pub fn build(self) -> BuildTreeConfig {
        BuildTreeConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for the root build or an included build.
#[derive(Default)]
pub struct BuildDefinitionBuilder {
    build: RawBuildDefinition,
}

impl BuildDefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        let mut builder = Self::new();
        builder.build.name = Some(name.to_string());
        builder
    }

    pub fn requested(mut self, selector: &str) -> Self {
        self.build.requested_tasks.push(selector.to_string());
        self
    }

    pub fn excluded(mut self, selector: &str) -> Self {
        self.build.excluded_tasks.push(selector.to_string());
        self
    }

    /// Add an (empty) project.
    pub fn project(mut self, path: &str) -> Self {
        self.build.projects.entry(path.to_string()).or_default();
        self
    }

    /// Add `task` to the project at `project`, creating the project if needed.
    pub fn task(mut self, project: &str, name: &str, task: TaskDefinitionBuilder) -> Self {
        self.build
            .projects
            .entry(project.to_string())
            .or_insert_with(ProjectDefinition::default)
            .tasks
            .insert(name.to_string(), task.build());
        self
    }

    pub fn build(self) -> RawBuildDefinition {
        self.build
    }
}

/// Builder for `TaskDefinition`.
#[derive(Default)]
pub struct TaskDefinitionBuilder {
    task: TaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.task.cmd = Some(cmd.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn transform(mut self, step: &str) -> Self {
        self.task.transforms.push(step.to_string());
        self
    }

    pub fn included(mut self, build: &str, task: &str) -> Self {
        self.task.included.push(IncludedTaskRef {
            build: build.to_string(),
            task: task.to_string(),
        });
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.task
    }
}
