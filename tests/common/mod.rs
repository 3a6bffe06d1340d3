#![allow(dead_code)]

use std::sync::Arc;

use buildtree::config::BuildTreeConfig;
use buildtree::tree::BuildTree;
use buildtree_test_utils::builders::{
    BuildDefinitionBuilder, BuildTreeConfigBuilder, TaskDefinitionBuilder,
};
use buildtree_test_utils::recording_executor::RecordingNodeExecutor;

pub fn tree_with(config: BuildTreeConfig, executor: &Arc<RecordingNodeExecutor>) -> BuildTree {
    buildtree_test_utils::init_tracing();
    BuildTree::from_config(config, executor.clone()).expect("valid build tree")
}

/// Root build `app` with one project:
/// - `:compile` needs `:jar` of the included build `lib`
/// - `:build` runs after `:compile`
///
/// Included build `lib`:
/// - `:jar` runs after `:classes`
/// - `:docs` is never needed by `app`
pub fn app_with_lib() -> BuildTreeConfigBuilder {
    let app = BuildDefinitionBuilder::named("app")
        .requested("build")
        .task(":", "compile", TaskDefinitionBuilder::new().included("lib", ":jar"))
        .task(":", "build", TaskDefinitionBuilder::new().after("compile"));
    let lib = BuildDefinitionBuilder::new()
        .task(":", "classes", TaskDefinitionBuilder::new())
        .task(":", "jar", TaskDefinitionBuilder::new().after("classes"))
        .task(":", "docs", TaskDefinitionBuilder::new());
    BuildTreeConfigBuilder::new(app).include("lib", lib)
}

/// A single-build tree: `:core:compile` <- `:app:compile` <- `:app:build`.
pub fn single_build() -> BuildTreeConfigBuilder {
    let root = BuildDefinitionBuilder::named("app")
        .requested("build")
        .project(":")
        .task(":core", "compile", TaskDefinitionBuilder::new())
        .task(":app", "compile", TaskDefinitionBuilder::new().after(":core:compile"))
        .task(":app", "build", TaskDefinitionBuilder::new().after("compile"));
    BuildTreeConfigBuilder::new(root)
}

pub fn selectors(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
