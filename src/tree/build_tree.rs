// src/tree/build_tree.rs

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::model::{BuildTreeConfig, TreeOptions};
use crate::errors::BuildError;
use crate::model::BuildListener;
use crate::operations::{BuildOperationListener, BuildOperationRunner};
use crate::plan::{DetailLevel, NodeExecutor, PlannedNode};
use crate::result::ExecutionResult;
use crate::tree::build_state::{BuildState, RootBuildState, TreeServices};
use crate::tree::path::BuildIdentifier;
use crate::tree::registry::BuildStateRegistry;
use crate::workgraph::BuildTreeWorkGraph;

/// The planned nodes of one build, at some detail level.
#[derive(Debug, Clone)]
pub struct PlannedBuild {
    pub build: BuildIdentifier,
    pub nodes: Vec<PlannedNode>,
}

/// A root build plus the builds it includes, run together.
pub struct BuildTree {
    registry: Arc<BuildStateRegistry>,
}

impl BuildTree {
    pub fn from_config(config: BuildTreeConfig, node_executor: Arc<dyn NodeExecutor>) -> Result<Self, BuildError> {
        let registry = BuildStateRegistry::new(TreeServices::new(config.options, node_executor));
        registry.add_root_build(config.root)?;
        for definition in config.included.into_values() {
            registry.add_included_build(definition)?;
        }
        info!(builds = registry.builds().len(), "build tree created");
        Ok(Self { registry })
    }

    pub fn registry(&self) -> &Arc<BuildStateRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &TreeOptions {
        &self.registry.services().options
    }

    pub fn root(&self) -> Result<Arc<RootBuildState>, BuildError> {
        self.registry.root_build()
    }

    pub fn operations(&self) -> &Arc<BuildOperationRunner> {
        &self.registry.services().operations
    }

    pub fn add_listener(&self, listener: Arc<dyn BuildListener>) {
        self.registry.services().listeners.add(listener);
    }

    pub fn add_operation_listener(&self, listener: Arc<dyn BuildOperationListener>) {
        self.operations().add_listener(listener);
    }

    /// Schedule `selectors` (or the root build's requested tasks when
    /// empty) across the tree and run them.
    pub fn schedule_and_run(&self, selectors: &[String]) -> ExecutionResult<()> {
        let mut graph = BuildTreeWorkGraph::new(&self.registry);
        let scheduled = graph
            .schedule_root_tasks(selectors)
            .and_then(|()| graph.finalize());
        match scheduled {
            Ok(()) => graph.run(),
            Err(err) => {
                warn!(error = %err, "could not schedule the build tree");
                ExecutionResult::failed(err)
            }
        }
    }

    /// Schedule like [`schedule_and_run`](Self::schedule_and_run), but only
    /// report the planned nodes of every participating build.
    pub fn planned_graph(
        &self,
        selectors: &[String],
        level: DetailLevel,
    ) -> Result<Vec<PlannedBuild>, BuildError> {
        let mut graph = BuildTreeWorkGraph::new(&self.registry);
        graph.schedule_root_tasks(selectors)?;
        graph.finalize()?;
        Ok(graph
            .planned_graphs()
            .into_iter()
            .map(|(build, planned)| PlannedBuild {
                build,
                nodes: planned.get_nodes(level).into_owned(),
            })
            .collect())
    }

    /// Finish, discard and stop every build. The returned result carries
    /// `result`'s failures plus anything that failed while finishing.
    pub fn finish(&self, result: ExecutionResult<()>) -> ExecutionResult<()> {
        let builds = self.registry.builds();
        let failed = !result.is_success();
        let tree_failure = result.get_failure();

        let mut listener_failures = Vec::new();
        let finished = ExecutionResult::for_each(&builds, |build| {
            let failure = if build.is_root() { tree_failure.clone() } else { None };
            build
                .lifecycle()
                .finish_build(failure, &mut |f| listener_failures.push(f))?;
            Ok(())
        });
        let discarded = ExecutionResult::for_each(&builds, |build| {
            build.before_model_discarded(failed).rethrow()?;
            Ok(())
        });
        let stopped = ExecutionResult::for_each(&builds, |build| {
            build.lifecycle().stop().rethrow()?;
            Ok(())
        });

        let outcome = result
            .with_failures(ExecutionResult::maybe_failed(listener_failures))
            .with_failures(finished)
            .with_failures(discarded)
            .with_failures(stopped);
        if let Some(failure) = outcome.get_failure() {
            warn!(failures = outcome.failures().len(), error = %failure, "build tree failed");
        } else {
            info!("build tree finished");
        }
        outcome
    }
}
