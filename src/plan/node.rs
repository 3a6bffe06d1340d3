// src/plan/node.rs

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::tree::{BuildIdentifier, Path};
use crate::workgraph::ExportedTaskNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Task,
    TransformStep,
}

/// Stable identity of a node in an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "nodeType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeIdentity {
    #[serde(rename_all = "camelCase")]
    Task { build_path: Path, task_path: Path },
    /// Step `step` of the transform chain feeding `consumer`.
    #[serde(rename_all = "camelCase")]
    TransformStep {
        build_path: Path,
        consumer: Path,
        step: usize,
        name: String,
    },
}

impl NodeIdentity {
    pub fn task(build_path: Path, task_path: Path) -> Self {
        NodeIdentity::Task {
            build_path,
            task_path,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeIdentity::Task { .. } => NodeType::Task,
            NodeIdentity::TransformStep { .. } => NodeType::TransformStep,
        }
    }

    pub fn build_path(&self) -> &Path {
        match self {
            NodeIdentity::Task { build_path, .. } | NodeIdentity::TransformStep { build_path, .. } => {
                build_path
            }
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeIdentity::Task {
                build_path,
                task_path,
            } => {
                if build_path.is_root() {
                    write!(f, "{task_path}")
                } else {
                    write!(f, "{build_path}{task_path}")
                }
            }
            NodeIdentity::TransformStep {
                consumer,
                step,
                name,
                ..
            } => write!(f, "{name}#{step} for {consumer}"),
        }
    }
}

/// What running a node means.
#[derive(Clone)]
pub enum NodeWork {
    Task { path: Path, cmd: Option<String> },
    TransformStep { name: String },
    /// A task of another build; "running" it waits for that build.
    External(Arc<ExportedTaskNode>),
}

impl NodeWork {
    pub fn is_external(&self) -> bool {
        matches!(self, NodeWork::External(_))
    }
}

impl fmt::Debug for NodeWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeWork::Task { path, cmd } => f
                .debug_struct("Task")
                .field("path", path)
                .field("cmd", cmd)
                .finish(),
            NodeWork::TransformStep { name } => {
                f.debug_struct("TransformStep").field("name", name).finish()
            }
            NodeWork::External(node) => f.debug_tuple("External").field(&node.to_string()).finish(),
        }
    }
}

/// A node the plan wants run now.
#[derive(Debug, Clone)]
pub struct ScheduledNode {
    pub id: usize,
    pub build: BuildIdentifier,
    pub identity: NodeIdentity,
    pub work: NodeWork,
}
