// src/plan/planned.rs

//! Read-only reporting view over a planned execution.
//!
//! A [`PlannedNodeGraph`] is captured once planning completes, at some
//! [`DetailLevel`]. Consumers may ask for a coarser level; the graph is then
//! contracted so that out-of-level nodes disappear while the transitive
//! dependencies through them are kept.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::plan::node::{NodeIdentity, NodeType};
use crate::tree::Path;

/// Granularity at which node identities are exposed.
///
/// Levels are ordered: a level includes every node type of the levels
/// below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum DetailLevel {
    #[serde(rename = "tasks")]
    Level1Tasks = 1,
    #[default]
    #[serde(rename = "transform-steps")]
    Level2TransformSteps = 2,
}

impl DetailLevel {
    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn of(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Task => DetailLevel::Level1Tasks,
            NodeType::TransformStep => DetailLevel::Level2TransformSteps,
        }
    }

    pub fn includes(self, identity: &NodeIdentity) -> bool {
        Self::of(identity.node_type()) <= self
    }
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailLevel::Level1Tasks => f.write_str("tasks"),
            DetailLevel::Level2TransformSteps => f.write_str("transform-steps"),
        }
    }
}

/// A node and its direct dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedNode {
    pub node_identity: NodeIdentity,
    pub node_dependencies: Vec<NodeIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdentity {
    pub build_path: Path,
    pub task_path: Path,
    pub task_id: u64,
}

/// A task and the tasks it depends on, with transform steps contracted away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTask {
    pub task: TaskIdentity,
    pub dependencies: Vec<TaskIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNodeGraph {
    detail_level: DetailLevel,
    nodes: Vec<PlannedNode>,
}

impl PlannedNodeGraph {
    pub fn new(detail_level: DetailLevel, nodes: Vec<PlannedNode>) -> Self {
        Self {
            detail_level,
            nodes,
        }
    }

    pub fn detail_level(&self) -> DetailLevel {
        self.detail_level
    }

    /// Nodes at `requested` detail.
    ///
    /// At or above the captured level the captured list is returned as is.
    pub fn get_nodes(&self, requested: DetailLevel) -> Cow<'_, [PlannedNode]> {
        if self.detail_level <= requested {
            return Cow::Borrowed(&self.nodes);
        }

        let by_identity: HashMap<&NodeIdentity, &PlannedNode> = self
            .nodes
            .iter()
            .map(|node| (&node.node_identity, node))
            .collect();

        let contracted = self
            .nodes
            .iter()
            .filter(|node| requested.includes(&node.node_identity))
            .map(|node| {
                let all_in_level = node
                    .node_dependencies
                    .iter()
                    .all(|dep| requested.includes(dep));
                let node_dependencies = if all_in_level {
                    node.node_dependencies.clone()
                } else {
                    contract_dependencies(node, requested, &by_identity)
                };
                PlannedNode {
                    node_identity: node.node_identity.clone(),
                    node_dependencies,
                }
            })
            .collect();
        Cow::Owned(contracted)
    }
}

/// Breadth-first walk from `node`'s dependencies, stepping over nodes
/// outside `level` and stopping at the nearest in-level ones.
fn contract_dependencies(
    node: &PlannedNode,
    level: DetailLevel,
    by_identity: &HashMap<&NodeIdentity, &PlannedNode>,
) -> Vec<NodeIdentity> {
    let mut seen: HashSet<&NodeIdentity> = HashSet::new();
    let mut queue: VecDeque<&NodeIdentity> = node.node_dependencies.iter().collect();
    let mut result = Vec::new();

    while let Some(dep) = queue.pop_front() {
        if !seen.insert(dep) {
            continue;
        }
        if level.includes(dep) {
            result.push(dep.clone());
        } else if let Some(skipped) = by_identity.get(dep) {
            queue.extend(skipped.node_dependencies.iter());
        }
    }
    result
}
