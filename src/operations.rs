// src/operations.rs

//! Build operations: named, instrumented units of work.
//!
//! Every operation gets a monotonic id and a `tracing` span, and is reported
//! to the registered [`BuildOperationListener`]s when it starts and when it
//! finishes, together with its structured result.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info_span};

use crate::errors::BuildError;
use crate::plan::{
    DetailLevel, ExecutionPlan, NodeIdentity, PlannedNode, PlannedNodeGraph, PlannedTask,
    TaskIdentity,
};
use crate::tree::Path;

pub const CALCULATE_TASK_GRAPH: &str = "Calculate task graph";

#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub id: u64,
    pub name: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct OperationFinishEvent {
    pub result: Option<serde_json::Value>,
    pub failure: Option<String>,
    pub duration: Duration,
}

pub trait BuildOperationListener: Send + Sync {
    fn started(&self, _operation: &OperationDescriptor) {}

    fn finished(&self, _operation: &OperationDescriptor, _event: &OperationFinishEvent) {}
}

/// Handed to a running operation so it can attach its result.
#[derive(Debug, Default)]
pub struct OperationContext {
    result: Option<serde_json::Value>,
}

impl OperationContext {
    pub fn set_result(&mut self, result: &impl Serialize) -> Result<(), BuildError> {
        let value = serde_json::to_value(result).map_err(anyhow::Error::from)?;
        self.result = Some(value);
        Ok(())
    }
}

#[derive(Default)]
pub struct BuildOperationRunner {
    next_id: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn BuildOperationListener>>>,
}

impl BuildOperationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn BuildOperationListener>) {
        self.listeners.write().push(listener);
    }

    /// Run `operation` as the build operation `name`.
    pub fn call<T, F>(
        &self,
        name: &str,
        details: serde_json::Value,
        operation: F,
    ) -> Result<T, BuildError>
    where
        F: FnOnce(&mut OperationContext) -> Result<T, BuildError>,
    {
        let descriptor = OperationDescriptor {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            name: name.to_string(),
            details,
        };
        let span = info_span!("build_operation", id = descriptor.id, name = %descriptor.name);
        let _enter = span.enter();

        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.started(&descriptor);
        }

        let start = Instant::now();
        let mut context = OperationContext::default();
        let outcome = operation(&mut context);

        let event = OperationFinishEvent {
            result: context.result.take(),
            failure: outcome.as_ref().err().map(|err| err.to_string()),
            duration: start.elapsed(),
        };
        debug!(
            failed = event.failure.is_some(),
            duration_ms = event.duration.as_millis() as u64,
            "build operation finished"
        );
        for listener in &listeners {
            listener.finished(&descriptor, &event);
        }
        outcome
    }
}

/// Result payload of [`CALCULATE_TASK_GRAPH`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateTaskGraphResult {
    pub requested_task_paths: Vec<Path>,
    pub excluded_task_paths: Vec<Path>,
    pub task_plan: Vec<PlannedTask>,
    pub execution_plan: Vec<PlannedNode>,
}

impl CalculateTaskGraphResult {
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let execution_plan = plan.planned_nodes();
        let ids: HashMap<&NodeIdentity, u64> = execution_plan
            .iter()
            .enumerate()
            .map(|(id, node)| (&node.node_identity, id as u64))
            .collect();
        let task_identity = |identity: &NodeIdentity| match identity {
            NodeIdentity::Task {
                build_path,
                task_path,
            } => Some(TaskIdentity {
                build_path: build_path.clone(),
                task_path: task_path.clone(),
                task_id: ids.get(identity).copied().unwrap_or_default(),
            }),
            NodeIdentity::TransformStep { .. } => None,
        };

        let graph = PlannedNodeGraph::new(DetailLevel::Level2TransformSteps, execution_plan.clone());
        let task_plan = graph
            .get_nodes(DetailLevel::Level1Tasks)
            .iter()
            .filter_map(|node| {
                Some(PlannedTask {
                    task: task_identity(&node.node_identity)?,
                    dependencies: node
                        .node_dependencies
                        .iter()
                        .filter_map(task_identity)
                        .collect(),
                })
            })
            .collect();

        Self {
            requested_task_paths: plan.requested_task_paths().to_vec(),
            excluded_task_paths: plan.excluded_task_paths().cloned().collect(),
            task_plan,
            execution_plan,
        }
    }
}
