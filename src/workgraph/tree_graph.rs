// src/workgraph/tree_graph.rs

//! The work graph spanning every build of the tree.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

use crate::errors::BuildError;
use crate::plan::PlannedNodeGraph;
use crate::result::{ExecutionResult, Failure};
use crate::tree::{BuildIdentifier, BuildStateRegistry};
use crate::workgraph::exported::ExportedTaskNode;
use crate::workgraph::graph::BuildWorkGraph;

/// One work graph per participating build, scheduled together and run
/// concurrently.
pub struct BuildTreeWorkGraph<'a> {
    registry: &'a BuildStateRegistry,
    graphs: BTreeMap<BuildIdentifier, BuildWorkGraph>,
}

impl<'a> BuildTreeWorkGraph<'a> {
    pub fn new(registry: &'a BuildStateRegistry) -> Self {
        Self {
            registry,
            graphs: BTreeMap::new(),
        }
    }

    fn graph_for(&mut self, build: &BuildIdentifier) -> Result<&mut BuildWorkGraph, BuildError> {
        if !self.graphs.contains_key(build) {
            let state = self.registry.get_build(build)?;
            let graph = state.work_graph().new_work_graph()?;
            self.graphs.insert(build.clone(), graph);
        }
        self.graphs
            .get_mut(build)
            .ok_or_else(|| BuildError::BuildNotFound(build.to_string()))
    }

    /// Schedule the root build's requested tasks, or `selectors` when
    /// non-empty, followed by everything they need from other builds.
    pub fn schedule_root_tasks(&mut self, selectors: &[String]) -> Result<(), BuildError> {
        let root = BuildIdentifier::root();
        let selectors = (!selectors.is_empty()).then_some(selectors);
        self.graph_for(&root)?.schedule_requested_tasks(selectors)?;
        self.schedule_external_nodes()
    }

    /// Schedule external nodes into their owning builds until no graph
    /// gains new work.
    pub fn schedule_external_nodes(&mut self) -> Result<(), BuildError> {
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut by_build: BTreeMap<BuildIdentifier, Vec<Arc<ExportedTaskNode>>> = BTreeMap::new();
            for graph in self.graphs.values() {
                for node in graph.external_nodes() {
                    by_build.entry(node.build().clone()).or_default().push(node);
                }
            }

            let mut changed = false;
            for (build, nodes) in by_build {
                changed |= self.graph_for(&build)?.schedule(&nodes)?;
            }
            if !changed {
                debug!(rounds, builds = self.graphs.len(), "tree work graph scheduled");
                return Ok(());
            }
        }
    }

    pub fn finalize(&mut self) -> Result<(), BuildError> {
        for graph in self.graphs.values_mut() {
            graph.finalize_graph()?;
        }
        Ok(())
    }

    pub fn builds(&self) -> impl Iterator<Item = &BuildIdentifier> {
        self.graphs.keys()
    }

    /// Planned nodes of every finalized graph, in build path order.
    pub fn planned_graphs(&self) -> Vec<(BuildIdentifier, PlannedNodeGraph)> {
        self.graphs
            .iter()
            .filter_map(|(build, graph)| Some((build.clone(), graph.planned_graph()?)))
            .collect()
    }

    /// Run every build's graph on its own thread and merge the results in
    /// build path order.
    pub fn run(self) -> ExecutionResult<()> {
        info!(builds = self.graphs.len(), "running build tree");
        let mut detached = Vec::with_capacity(self.graphs.len());
        let mut result = ExecutionResult::success();
        for (build, graph) in self.graphs {
            match graph.detach() {
                Ok(graph) => detached.push(graph),
                Err(err) => {
                    result = result.with_failures(ExecutionResult::<()>::failed(Failure::new(err)));
                    debug!(build = %build, "graph could not be detached");
                }
            }
        }

        let results: Vec<ExecutionResult<()>> = thread::scope(|scope| {
            let handles: Vec<_> = detached
                .into_iter()
                .map(|graph| {
                    let build = graph.build().clone();
                    let handle = thread::Builder::new()
                        .name(format!("build {}", build.build_path()))
                        .spawn_scoped(scope, move || graph.attach().run_work());
                    (build, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(build, handle)| match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|payload| {
                        ExecutionResult::failed(Failure::from_panic(payload))
                    }),
                    Err(err) => ExecutionResult::failed(Failure::msg(format!(
                        "Could not start a thread for {build}: {err}"
                    ))),
                })
                .collect()
        });

        results
            .into_iter()
            .fold(result, |merged, next| merged.with_failures(next))
    }
}
