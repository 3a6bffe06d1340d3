// src/plan/execution_plan.rs

//! Mutable execution plan, filled in while a work graph is populated.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use tracing::debug;

use crate::errors::BuildError;
use crate::model::BuildModel;
use crate::plan::finalized::{FinalNode, FinalizedExecutionPlan};
use crate::plan::node::{NodeIdentity, NodeWork};
use crate::plan::planned::PlannedNode;
use crate::tree::{BuildIdentifier, Path};
use crate::workgraph::ExportedTaskNode;

/// Looks up tasks of other builds in the tree.
pub trait IncludedTaskResolver: Send + Sync {
    fn resolve(&self, build: &str, task: &Path) -> Result<Arc<ExportedTaskNode>, BuildError>;
}

struct PlanNode {
    identity: NodeIdentity,
    work: NodeWork,
    dependencies: Vec<usize>,
    observers: Vec<Arc<ExportedTaskNode>>,
}

pub struct ExecutionPlan {
    build: BuildIdentifier,
    resolver: Option<Arc<dyn IncludedTaskResolver>>,
    nodes: Vec<PlanNode>,
    index: HashMap<NodeIdentity, usize>,
    requested: Vec<Path>,
    excluded: BTreeSet<Path>,
}

impl ExecutionPlan {
    pub fn new(build: BuildIdentifier, resolver: Option<Arc<dyn IncludedTaskResolver>>) -> Self {
        Self {
            build,
            resolver,
            nodes: Vec::new(),
            index: HashMap::new(),
            requested: Vec::new(),
            excluded: BTreeSet::new(),
        }
    }

    pub fn build(&self) -> &BuildIdentifier {
        &self.build
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, identity: &NodeIdentity) -> bool {
        self.index.contains_key(identity)
    }

    pub fn contains_task(&self, task_path: &Path) -> bool {
        self.contains(&self.task_identity(task_path))
    }

    pub fn requested_task_paths(&self) -> &[Path] {
        &self.requested
    }

    pub fn excluded_task_paths(&self) -> impl Iterator<Item = &Path> {
        self.excluded.iter()
    }

    /// Exclude `task_path`. Only affects tasks added afterwards.
    pub fn exclude(&mut self, task_path: Path) {
        debug!(build = %self.build, task = %task_path, "excluding task");
        self.excluded.insert(task_path);
    }

    /// Add `task_path` and everything it depends on.
    ///
    /// Returns `false` when the task is excluded.
    pub fn add_entry_task(&mut self, model: &BuildModel, task_path: &Path) -> Result<bool, BuildError> {
        let added = self.add_task(model, task_path)?.is_some();
        if added && !self.requested.contains(task_path) {
            self.requested.push(task_path.clone());
        }
        Ok(added)
    }

    /// Publish the outcome of `task_path` to `observer` once it is known.
    pub fn add_observer(&mut self, task_path: &Path, observer: Arc<ExportedTaskNode>) -> bool {
        let identity = self.task_identity(task_path);
        match self.index.get(&identity) {
            Some(&id) => {
                let observers = &mut self.nodes[id].observers;
                if !observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
                    observers.push(observer);
                }
                true
            }
            None => false,
        }
    }

    /// Tasks of other builds this plan waits for.
    pub fn external_nodes(&self) -> Vec<Arc<ExportedTaskNode>> {
        self.nodes
            .iter()
            .filter_map(|node| match &node.work {
                NodeWork::External(exported) => Some(Arc::clone(exported)),
                _ => None,
            })
            .collect()
    }

    /// Exported nodes observing tasks of this plan.
    pub fn observers(&self) -> Vec<Arc<ExportedTaskNode>> {
        self.nodes
            .iter()
            .flat_map(|node| node.observers.iter().cloned())
            .collect()
    }

    /// Nodes in insertion order with their direct dependencies.
    pub fn planned_nodes(&self) -> Vec<PlannedNode> {
        self.nodes
            .iter()
            .map(|node| PlannedNode {
                node_identity: node.identity.clone(),
                node_dependencies: node
                    .dependencies
                    .iter()
                    .map(|&dep| self.nodes[dep].identity.clone())
                    .collect(),
            })
            .collect()
    }

    /// Order the nodes for execution.
    pub fn finalize(self, continue_on_failure: bool) -> Result<FinalizedExecutionPlan, BuildError> {
        // Edge direction: dependency -> dependent.
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        let indices: Vec<_> = (0..self.nodes.len()).map(|id| graph.add_node(id)).collect();
        for (id, node) in self.nodes.iter().enumerate() {
            for &dep in &node.dependencies {
                graph.add_edge(indices[dep], indices[id], ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let id = graph[cycle.node_id()];
            BuildError::DagCycle(format!(
                "cycle detected in task graph of {} involving '{}'",
                self.build, self.nodes[id].identity
            ))
        })?;

        let mut position = vec![0usize; self.nodes.len()];
        for (pos, index) in order.iter().enumerate() {
            position[graph[*index]] = pos;
        }

        let mut slots: Vec<Option<PlanNode>> = self.nodes.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(slots.len());
        for index in &order {
            if let Some(node) = slots[graph[*index]].take() {
                ordered.push(FinalNode {
                    identity: node.identity,
                    work: node.work,
                    dependencies: node.dependencies.iter().map(|&dep| position[dep]).collect(),
                    dependents: Vec::new(),
                    observers: node.observers,
                });
            }
        }

        debug!(build = %self.build, nodes = ordered.len(), "execution plan finalized");
        Ok(FinalizedExecutionPlan::new(
            self.build,
            ordered,
            continue_on_failure,
            self.requested,
            self.excluded.into_iter().collect(),
        ))
    }

    fn task_identity(&self, task_path: &Path) -> NodeIdentity {
        NodeIdentity::task(self.build.build_path().clone(), task_path.clone())
    }

    fn push_node(&mut self, identity: NodeIdentity, work: NodeWork) -> usize {
        if let Some(&id) = self.index.get(&identity) {
            return id;
        }
        let id = self.nodes.len();
        self.index.insert(identity.clone(), id);
        self.nodes.push(PlanNode {
            identity,
            work,
            dependencies: Vec::new(),
            observers: Vec::new(),
        });
        id
    }

    fn add_task(&mut self, model: &BuildModel, task_path: &Path) -> Result<Option<usize>, BuildError> {
        if self.excluded.contains(task_path) {
            debug!(build = %self.build, task = %task_path, "skipping excluded task");
            return Ok(None);
        }
        let identity = self.task_identity(task_path);
        if let Some(&id) = self.index.get(&identity) {
            return Ok(Some(id));
        }

        let spec = model
            .task(task_path)
            .ok_or_else(|| BuildError::TaskNotFound(format!("'{task_path}' in {}", self.build)))?;
        let id = self.push_node(
            identity,
            NodeWork::Task {
                path: task_path.clone(),
                cmd: spec.cmd.clone(),
            },
        );

        let mut dependencies = Vec::new();
        for dep in &spec.dependencies {
            if let Some(dep_id) = self.add_task(model, dep)? {
                dependencies.push(dep_id);
            }
        }

        let mut previous_step = None;
        for (step, name) in spec.transforms.iter().enumerate() {
            let step_id = self.push_node(
                NodeIdentity::TransformStep {
                    build_path: self.build.build_path().clone(),
                    consumer: task_path.clone(),
                    step,
                    name: name.clone(),
                },
                NodeWork::TransformStep { name: name.clone() },
            );
            if let Some(previous) = previous_step {
                self.nodes[step_id].dependencies.push(previous);
            }
            previous_step = Some(step_id);
        }
        dependencies.extend(previous_step);

        for included in &spec.included {
            let resolver = self.resolver.clone().ok_or_else(|| {
                BuildError::UnsupportedInclusion(format!(
                    "{} cannot reference tasks of build '{}'",
                    self.build, included.build
                ))
            })?;
            let exported = resolver.resolve(&included.build, &included.task)?;
            dependencies.push(self.add_external(exported));
        }

        dependencies.sort_unstable();
        dependencies.dedup();
        self.nodes[id].dependencies = dependencies;
        Ok(Some(id))
    }

    fn add_external(&mut self, exported: Arc<ExportedTaskNode>) -> usize {
        let identity = NodeIdentity::task(
            exported.build().build_path().clone(),
            exported.task_path().clone(),
        );
        self.push_node(identity, NodeWork::External(exported))
    }
}

/// Handed to work graph population actions to add nodes to a plan.
pub struct WorkGraphBuilder<'a> {
    plan: &'a mut ExecutionPlan,
    model: &'a BuildModel,
}

impl<'a> WorkGraphBuilder<'a> {
    pub fn new(plan: &'a mut ExecutionPlan, model: &'a BuildModel) -> Self {
        Self { plan, model }
    }

    pub fn model(&self) -> &BuildModel {
        self.model
    }

    pub fn plan(&self) -> &ExecutionPlan {
        self.plan
    }

    /// Exclusions first, then the build's requested tasks.
    pub fn add_requested_tasks(&mut self) -> Result<(), BuildError> {
        let model = self.model;
        self.exclude_tasks(model.excluded_tasks())?;
        self.add_task_selectors(model.requested_tasks())
    }

    pub fn add_task_selectors(&mut self, selectors: &[String]) -> Result<(), BuildError> {
        for selector in selectors {
            let paths: Vec<Path> = self
                .model
                .select_tasks(selector)?
                .into_iter()
                .map(|spec| spec.path.clone())
                .collect();
            self.add_entry_tasks(&paths)?;
        }
        Ok(())
    }

    pub fn add_entry_tasks(&mut self, paths: &[Path]) -> Result<(), BuildError> {
        for path in paths {
            self.plan.add_entry_task(self.model, path)?;
        }
        Ok(())
    }

    pub fn exclude_tasks(&mut self, selectors: &[String]) -> Result<(), BuildError> {
        for selector in selectors {
            for spec in self.model.select_tasks(selector)? {
                self.plan.exclude(spec.path.clone());
            }
        }
        Ok(())
    }

    /// Schedule the task behind `node` and publish its outcome to `node`.
    ///
    /// An excluded task is reported as successful straight away.
    pub fn add_exported_entry(&mut self, node: &Arc<ExportedTaskNode>) -> Result<(), BuildError> {
        let model = self.model;
        self.exclude_tasks(model.excluded_tasks())?;
        let task_path = node.task_path().clone();
        if self.plan.add_entry_task(self.model, &task_path)? {
            self.plan.add_observer(&task_path, Arc::clone(node));
        } else {
            node.task_completed(true);
        }
        Ok(())
    }
}
