// src/workgraph/graph.rs

//! Per-build work graphs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::{BuildError, WorkGraphError};
use crate::lifecycle::BuildLifecycleController;
use crate::plan::{DetailLevel, ExecutionPlan, FinalizedExecutionPlan, PlannedNodeGraph, WorkGraphBuilder};
use crate::result::ExecutionResult;
use crate::tree::{BuildIdentifier, Path, ProjectStateRegistry};
use crate::workgraph::exported::{ExportedTaskNode, TaskState};

/// Owns the exported task nodes of one build and hands out its work graphs,
/// at most one at a time.
pub struct BuildWorkGraphController {
    build: BuildIdentifier,
    lifecycle: Arc<BuildLifecycleController>,
    project_states: Arc<ProjectStateRegistry>,
    nodes: Mutex<BTreeMap<Path, Arc<ExportedTaskNode>>>,
    current: Mutex<Option<u64>>,
    next_id: AtomicU64,
}

impl BuildWorkGraphController {
    pub fn new(
        build: BuildIdentifier,
        lifecycle: Arc<BuildLifecycleController>,
        project_states: Arc<ProjectStateRegistry>,
    ) -> Self {
        Self {
            build,
            lifecycle,
            project_states,
            nodes: Mutex::new(BTreeMap::new()),
            current: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn build(&self) -> &BuildIdentifier {
        &self.build
    }

    pub fn lifecycle(&self) -> &Arc<BuildLifecycleController> {
        &self.lifecycle
    }

    /// The exported node for `task_path`, created on first use.
    pub fn locate_task(&self, task_path: &Path) -> Arc<ExportedTaskNode> {
        let mut nodes = self.nodes.lock();
        Arc::clone(nodes.entry(task_path.clone()).or_insert_with(|| {
            debug!(build = %self.build, task = %task_path, "exporting task");
            Arc::new(ExportedTaskNode::new(self.build.clone(), task_path.clone()))
        }))
    }

    pub fn exported_nodes(&self) -> Vec<Arc<ExportedTaskNode>> {
        self.nodes.lock().values().cloned().collect()
    }

    fn owns(&self, node: &Arc<ExportedTaskNode>) -> bool {
        self.nodes
            .lock()
            .get(node.task_path())
            .is_some_and(|owned| Arc::ptr_eq(owned, node))
    }

    pub fn has_active_graph(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Start a new work graph, owned by the calling thread.
    pub fn new_work_graph(self: &Arc<Self>) -> Result<BuildWorkGraph, WorkGraphError> {
        let mut current = self.current.lock();
        if current.is_some() {
            return Err(WorkGraphError::AlreadyActive {
                build: self.build.to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        *current = Some(id);
        drop(current);

        for node in self.exported_nodes() {
            node.reset();
        }
        debug!(build = %self.build, graph = id, "work graph created");
        Ok(BuildWorkGraph {
            id,
            controller: Arc::clone(self),
            owner: thread::current().id(),
            plan: None,
            finalized: None,
            populated: false,
            ran: false,
        })
    }

    /// Prepare the exported nodes for a model reset.
    pub fn reset_nodes(&self) -> Result<(), WorkGraphError> {
        if self.has_active_graph() {
            return Err(WorkGraphError::AlreadyActive {
                build: self.build.to_string(),
            });
        }
        for node in self.exported_nodes() {
            node.reset();
        }
        Ok(())
    }

    /// Forget every exported node. Consumers still waiting on a node that
    /// will never run see it fail.
    pub fn discard_nodes(&self, failed: bool) {
        let nodes = std::mem::take(&mut *self.nodes.lock());
        for node in nodes.into_values() {
            if node.task_state() == TaskState::Waiting {
                warn!(node = %node, failed, "discarding exported node before it completed");
                node.task_completed(false);
            }
        }
    }

    fn graph_finished(&self, id: u64) {
        let mut current = self.current.lock();
        if *current == Some(id) {
            *current = None;
        }
    }
}

/// The work graph of one build.
///
/// Only the thread that created the graph may use it. Use
/// [`detach`](Self::detach) to hand it to another thread.
pub struct BuildWorkGraph {
    id: u64,
    controller: Arc<BuildWorkGraphController>,
    owner: ThreadId,
    plan: Option<ExecutionPlan>,
    finalized: Option<FinalizedExecutionPlan>,
    /// Whether anything was ever added to this graph.
    populated: bool,
    ran: bool,
}

impl BuildWorkGraph {
    pub fn build(&self) -> &BuildIdentifier {
        &self.controller.build
    }

    fn assert_is_owner(&self) -> Result<(), WorkGraphError> {
        if thread::current().id() != self.owner {
            return Err(WorkGraphError::NotOwner {
                graph: format!("work graph of {}", self.controller.build),
            });
        }
        Ok(())
    }

    fn assert_not_finalized(&self) -> Result<(), WorkGraphError> {
        if self.finalized.is_some() {
            return Err(WorkGraphError::AlreadyFinalized {
                build: self.controller.build.to_string(),
            });
        }
        Ok(())
    }

    /// Schedule the tasks behind `nodes`, which must belong to this build.
    ///
    /// Returns `false`, changing nothing, when every node is already
    /// scheduled.
    pub fn schedule(&mut self, nodes: &[Arc<ExportedTaskNode>]) -> Result<bool, BuildError> {
        self.assert_is_owner()?;
        self.assert_not_finalized()?;
        if let Some(foreign) = nodes.iter().find(|node| !self.controller.owns(node)) {
            return Err(WorkGraphError::ForeignNode {
                build: self.controller.build.to_string(),
                task: foreign.task_path().to_string(),
            }
            .into());
        }

        let pending: Vec<&Arc<ExportedTaskNode>> =
            nodes.iter().filter(|node| node.should_schedule()).collect();
        if pending.is_empty() {
            return Ok(false);
        }

        self.populate_work_graph(|builder| {
            for node in pending {
                node.when_scheduled();
                builder.add_exported_entry(node)?;
            }
            Ok(())
        })?;
        Ok(true)
    }

    /// Schedule the build's requested tasks, or `selectors` when given.
    pub fn schedule_requested_tasks(&mut self, selectors: Option<&[String]>) -> Result<(), BuildError> {
        self.assert_is_owner()?;
        self.assert_not_finalized()?;
        let lifecycle = Arc::clone(&self.controller.lifecycle);
        let project_states = Arc::clone(&self.controller.project_states);
        let plan = self.plan.get_or_insert_with(|| lifecycle.new_execution_plan());
        project_states.with_mutable_state_of_all_projects(|| match selectors {
            Some(selectors) => lifecycle.schedule_tasks(plan, selectors),
            None => lifecycle.schedule_requested_tasks(plan),
        })
    }

    /// Add nodes via `action` while holding every project's mutable state.
    pub fn populate_work_graph<F>(&mut self, action: F) -> Result<(), BuildError>
    where
        F: FnOnce(&mut WorkGraphBuilder<'_>) -> Result<(), BuildError>,
    {
        self.assert_is_owner()?;
        self.assert_not_finalized()?;
        let lifecycle = Arc::clone(&self.controller.lifecycle);
        let project_states = Arc::clone(&self.controller.project_states);
        let plan = self.plan.get_or_insert_with(|| lifecycle.new_execution_plan());
        project_states.with_mutable_state_of_all_projects(|| lifecycle.populate_work_graph(plan, action))
    }

    /// Exported nodes of other builds this graph waits on.
    pub fn external_nodes(&self) -> Vec<Arc<ExportedTaskNode>> {
        match (&self.plan, &self.finalized) {
            (_, Some(finalized)) => finalized.external_nodes(),
            (Some(plan), None) => plan.external_nodes(),
            (None, None) => Vec::new(),
        }
    }

    pub fn finalize_graph(&mut self) -> Result<(), BuildError> {
        self.assert_is_owner()?;
        self.assert_not_finalized()?;
        let lifecycle = Arc::clone(&self.controller.lifecycle);
        let finalized = match self.plan.take() {
            Some(plan) => {
                self.populated = true;
                self.controller
                    .project_states
                    .with_mutable_state_of_all_projects(|| lifecycle.finalize_work_graph(plan))?
            }
            // Nothing was scheduled, so the build's lifecycle is left alone.
            None => FinalizedExecutionPlan::empty(self.controller.build.clone()),
        };
        debug!(build = %self.controller.build, nodes = finalized.len(), "work graph finalized");
        self.finalized = Some(finalized);
        Ok(())
    }

    pub fn finalized_plan(&self) -> Option<&FinalizedExecutionPlan> {
        self.finalized.as_ref()
    }

    pub fn planned_graph(&self) -> Option<PlannedNodeGraph> {
        self.finalized
            .as_ref()
            .map(|plan| PlannedNodeGraph::new(DetailLevel::Level2TransformSteps, plan.planned_nodes()))
    }

    /// Run the finalized plan. Exported nodes of this build that were not
    /// scheduled report success while it runs. A graph that was finalized
    /// without anything scheduled runs nothing.
    pub fn run_work(&mut self) -> ExecutionResult<()> {
        if let Err(err) = self.assert_is_owner() {
            return ExecutionResult::failed(err);
        }
        let Some(finalized) = self.finalized.as_mut() else {
            return ExecutionResult::failed(WorkGraphError::NotFinalized {
                build: self.controller.build.to_string(),
            });
        };

        let nodes = self.controller.exported_nodes();
        for node in &nodes {
            node.before_execution();
        }
        let result = if self.populated {
            self.controller.lifecycle.execute_tasks(finalized)
        } else {
            debug!(build = %self.controller.build, "nothing scheduled, skipping execution");
            ExecutionResult::success()
        };
        for node in &nodes {
            node.after_execution();
        }
        self.ran = true;
        result
    }

    /// Release the graph so another thread can [`attach`](DetachedWorkGraph::attach) it.
    pub fn detach(self) -> Result<DetachedWorkGraph, WorkGraphError> {
        self.assert_is_owner()?;
        Ok(DetachedWorkGraph { graph: self })
    }
}

impl Drop for BuildWorkGraph {
    fn drop(&mut self) {
        if !self.ran {
            // Nothing ran, so scheduled exported nodes never will.
            for node in self.controller.exported_nodes() {
                node.after_execution();
            }
        }
        self.controller.graph_finished(self.id);
        debug!(build = %self.controller.build, graph = self.id, ran = self.ran, "work graph released");
    }
}

/// A work graph in transit between threads.
pub struct DetachedWorkGraph {
    graph: BuildWorkGraph,
}

impl DetachedWorkGraph {
    pub fn build(&self) -> &BuildIdentifier {
        self.graph.build()
    }

    /// Make the calling thread the owner of the graph.
    pub fn attach(self) -> BuildWorkGraph {
        let mut graph = self.graph;
        graph.owner = thread::current().id();
        graph
    }
}
