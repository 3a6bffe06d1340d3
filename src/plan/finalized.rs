// src/plan/finalized.rs

//! Pure scheduling core over a finalized plan.
//!
//! [`FinalizedExecutionPlan`] has no channels, no Tokio types and performs no
//! IO. The async executor asks it which nodes are ready, reports
//! completions back, and publishes the resulting transitions.

use std::sync::Arc;

use tracing::{debug, info};

use crate::plan::node::{NodeIdentity, NodeWork, ScheduledNode};
use crate::plan::planned::PlannedNode;
use crate::tree::{BuildIdentifier, Path};
use crate::workgraph::ExportedTaskNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not run because a dependency failed or the plan was aborted.
    Skipped,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Succeeded | NodeState::Failed | NodeState::Skipped)
    }
}

/// A node reaching a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTransition {
    pub id: usize,
    pub state: NodeState,
}

pub(crate) struct FinalNode {
    pub(crate) identity: NodeIdentity,
    pub(crate) work: NodeWork,
    pub(crate) dependencies: Vec<usize>,
    pub(crate) dependents: Vec<usize>,
    pub(crate) observers: Vec<Arc<ExportedTaskNode>>,
}

/// Nodes in topological order plus per-node run state.
pub struct FinalizedExecutionPlan {
    build: BuildIdentifier,
    nodes: Vec<FinalNode>,
    states: Vec<NodeState>,
    continue_on_failure: bool,
    /// Non-external nodes currently running.
    busy: usize,
    requested: Vec<Path>,
    excluded: Vec<Path>,
}

impl FinalizedExecutionPlan {
    pub(crate) fn new(
        build: BuildIdentifier,
        mut nodes: Vec<FinalNode>,
        continue_on_failure: bool,
        requested: Vec<Path>,
        excluded: Vec<Path>,
    ) -> Self {
        for id in 0..nodes.len() {
            for dep in nodes[id].dependencies.clone() {
                nodes[dep].dependents.push(id);
            }
        }
        let states = vec![NodeState::Pending; nodes.len()];
        Self {
            build,
            nodes,
            states,
            continue_on_failure,
            busy: 0,
            requested,
            excluded,
        }
    }

    pub fn empty(build: BuildIdentifier) -> Self {
        Self::new(build, Vec::new(), false, Vec::new(), Vec::new())
    }

    pub fn build(&self) -> &BuildIdentifier {
        &self.build
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn continue_on_failure(&self) -> bool {
        self.continue_on_failure
    }

    pub fn requested_task_paths(&self) -> &[Path] {
        &self.requested
    }

    pub fn excluded_task_paths(&self) -> &[Path] {
        &self.excluded
    }

    pub fn state_of(&self, id: usize) -> Option<NodeState> {
        self.states.get(id).copied()
    }

    pub fn identity_of(&self, id: usize) -> Option<&NodeIdentity> {
        self.nodes.get(id).map(|node| &node.identity)
    }

    pub fn id_of(&self, identity: &NodeIdentity) -> Option<usize> {
        self.nodes.iter().position(|node| &node.identity == identity)
    }

    pub fn state_of_identity(&self, identity: &NodeIdentity) -> Option<NodeState> {
        self.id_of(identity).and_then(|id| self.state_of(id))
    }

    pub fn observers_of(&self, id: usize) -> &[Arc<ExportedTaskNode>] {
        self.nodes
            .get(id)
            .map(|node| node.observers.as_slice())
            .unwrap_or_default()
    }

    /// Every exported node observing this plan.
    pub fn observers(&self) -> Vec<Arc<ExportedTaskNode>> {
        self.nodes
            .iter()
            .flat_map(|node| node.observers.iter().cloned())
            .collect()
    }

    pub fn external_nodes(&self) -> Vec<Arc<ExportedTaskNode>> {
        self.nodes
            .iter()
            .filter_map(|node| match &node.work {
                NodeWork::External(exported) => Some(Arc::clone(exported)),
                _ => None,
            })
            .collect()
    }

    /// Nodes in execution order with their direct dependencies.
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

    /// True once every node is terminal.
    pub fn is_complete(&self) -> bool {
        self.states.iter().all(|state| state.is_terminal())
    }

    pub fn has_failures(&self) -> bool {
        self.states.contains(&NodeState::Failed)
    }

    /// Mark every ready node `Running` and return it.
    ///
    /// At most `max_workers` non-external nodes run at once. External nodes
    /// only wait on another build and do not count towards the limit.
    pub fn select_ready(&mut self, max_workers: usize) -> Vec<ScheduledNode> {
        let max_workers = max_workers.max(1);
        let mut ready = Vec::new();

        for id in 0..self.nodes.len() {
            if self.states[id] != NodeState::Pending {
                continue;
            }
            let deps_done = self.nodes[id]
                .dependencies
                .iter()
                .all(|&dep| self.states[dep] == NodeState::Succeeded);
            if !deps_done {
                continue;
            }

            let node = &self.nodes[id];
            let external = node.work.is_external();
            if !external {
                if self.busy >= max_workers {
                    continue;
                }
                self.busy += 1;
            }
            self.states[id] = NodeState::Running;
            debug!(build = %self.build, node = %node.identity, "dependencies satisfied; marking Running");
            ready.push(ScheduledNode {
                id,
                build: self.build.clone(),
                identity: node.identity.clone(),
                work: node.work.clone(),
            });
        }
        ready
    }

    /// Record the outcome of a running node.
    ///
    /// Returns every node that became terminal as a result: the node
    /// itself, plus any nodes skipped because of a failure.
    pub fn node_finished(&mut self, id: usize, success: bool) -> Vec<NodeTransition> {
        if self.states.get(id) != Some(&NodeState::Running) {
            return Vec::new();
        }
        if !self.nodes[id].work.is_external() {
            self.busy = self.busy.saturating_sub(1);
        }

        let state = if success {
            NodeState::Succeeded
        } else {
            NodeState::Failed
        };
        self.states[id] = state;
        let mut transitions = vec![NodeTransition { id, state }];

        if !success {
            info!(build = %self.build, node = %self.nodes[id].identity, "node failed");
            transitions.extend(self.skip_dependents(id));
            if !self.continue_on_failure {
                transitions.extend(self.abort());
            }
        }
        transitions
    }

    /// Skip every node that has not started yet.
    pub fn abort(&mut self) -> Vec<NodeTransition> {
        let mut skipped = Vec::new();
        for (id, state) in self.states.iter_mut().enumerate() {
            if *state == NodeState::Pending {
                *state = NodeState::Skipped;
                skipped.push(NodeTransition {
                    id,
                    state: NodeState::Skipped,
                });
            }
        }
        if !skipped.is_empty() {
            debug!(build = %self.build, skipped = skipped.len(), "skipping remaining nodes");
        }
        skipped
    }

    fn skip_dependents(&mut self, failed: usize) -> Vec<NodeTransition> {
        let mut stack: Vec<usize> = self.nodes[failed].dependents.clone();
        let mut skipped = Vec::new();

        while let Some(id) = stack.pop() {
            if self.states[id] == NodeState::Pending {
                self.states[id] = NodeState::Skipped;
                debug!(
                    build = %self.build,
                    node = %self.nodes[id].identity,
                    "skipping dependent due to upstream failure"
                );
                skipped.push(NodeTransition {
                    id,
                    state: NodeState::Skipped,
                });
                stack.extend(self.nodes[id].dependents.iter().copied());
            }
        }
        skipped
    }
}
