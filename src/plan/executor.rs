// src/plan/executor.rs

//! Async shell around [`FinalizedExecutionPlan`].
//!
//! Responsibilities:
//! - ask the plan for ready nodes and dispatch them to the [`NodeExecutor`],
//! - wait on other builds for external nodes,
//! - feed completions back into the plan over an mpsc channel,
//! - publish terminal node states to observing exported nodes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::lifecycle::BuildWorkExecutor;
use crate::plan::finalized::{FinalizedExecutionPlan, NodeState, NodeTransition};
use crate::plan::node::{NodeWork, ScheduledNode};
use crate::plan::node_executor::NodeExecutor;
use crate::result::{ExecutionResult, Failure};
use crate::workgraph::{ExportedTaskNode, TaskState};

#[derive(Debug)]
enum NodeOutcome {
    Succeeded,
    Failed(Failure),
    /// An external node whose output is not available. The owning build
    /// reports the failure itself.
    Unavailable,
}

#[derive(Debug)]
struct NodeCompletion {
    id: usize,
    outcome: NodeOutcome,
}

pub struct PlanExecutor {
    node_executor: Arc<dyn NodeExecutor>,
    max_workers: usize,
}

impl PlanExecutor {
    pub fn new(node_executor: Arc<dyn NodeExecutor>, max_workers: usize) -> Self {
        Self {
            node_executor,
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Main event loop. Returns once no node is running and nothing more
    /// can be started.
    pub async fn run(&self, plan: &mut FinalizedExecutionPlan) -> ExecutionResult<()> {
        let build = plan.build().clone();
        info!(build = %build, nodes = plan.len(), "executing plan");

        let (tx, mut rx) = mpsc::channel::<NodeCompletion>(64);
        let mut in_flight = 0usize;
        let mut failures = Vec::new();

        loop {
            for node in plan.select_ready(self.max_workers) {
                in_flight += 1;
                tokio::spawn(run_node(node, Arc::clone(&self.node_executor), tx.clone()));
            }
            if in_flight == 0 {
                break;
            }

            let Some(completion) = rx.recv().await else {
                break;
            };
            in_flight -= 1;
            debug!(build = %build, node = completion.id, outcome = ?completion.outcome, "node completed");

            let success = matches!(completion.outcome, NodeOutcome::Succeeded);
            if let NodeOutcome::Failed(failure) = completion.outcome {
                failures.push(failure);
            }
            let transitions = plan.node_finished(completion.id, success);
            publish(plan, &transitions);
        }

        if !plan.is_complete() {
            warn!(build = %build, "plan stopped with unfinished nodes");
            let transitions = plan.abort();
            publish(plan, &transitions);
        }

        info!(build = %build, failures = failures.len(), "plan execution finished");
        ExecutionResult::maybe_failed(failures)
    }
}

impl BuildWorkExecutor for PlanExecutor {
    /// Runs the plan on a dedicated multi-thread runtime.
    fn execute(&self, plan: &mut FinalizedExecutionPlan) -> ExecutionResult<()> {
        if plan.is_empty() {
            return ExecutionResult::success();
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.max_workers)
            .thread_name("buildtree-worker")
            .enable_all()
            .build();
        match runtime {
            Ok(runtime) => runtime.block_on(self.run(plan)),
            Err(err) => ExecutionResult::failed(Failure::new(err)),
        }
    }
}

fn publish(plan: &FinalizedExecutionPlan, transitions: &[NodeTransition]) {
    for transition in transitions {
        let success = transition.state == NodeState::Succeeded;
        for observer in plan.observers_of(transition.id) {
            observer.task_completed(success);
        }
    }
}

async fn run_node(
    node: ScheduledNode,
    executor: Arc<dyn NodeExecutor>,
    tx: mpsc::Sender<NodeCompletion>,
) {
    let id = node.id;
    let outcome = match &node.work {
        NodeWork::External(exported) => wait_for_external(Arc::clone(exported)).await,
        _ => execute_isolated(node, executor).await,
    };
    let _ = tx.send(NodeCompletion { id, outcome }).await;
}

/// Execute on its own task so a panic becomes a failure of this node only.
async fn execute_isolated(node: ScheduledNode, executor: Arc<dyn NodeExecutor>) -> NodeOutcome {
    let identity = node.identity.clone();
    let handle = tokio::spawn(async move { executor.execute(&node).await });
    match handle.await {
        Ok(Ok(())) => NodeOutcome::Succeeded,
        Ok(Err(err)) => {
            warn!(node = %identity, error = %err, "node failed");
            NodeOutcome::Failed(Failure::from(err.context(format!("Execution failed for {identity}."))))
        }
        Err(join) => {
            warn!(node = %identity, error = %join, "node panicked");
            NodeOutcome::Failed(Failure::msg(format!("Execution of {identity} panicked: {join}")))
        }
    }
}

async fn wait_for_external(exported: Arc<ExportedTaskNode>) -> NodeOutcome {
    let mut rx = exported.subscribe();
    let state = match rx.wait_for(|state| *state != TaskState::Waiting).await {
        Ok(state) => *state,
        Err(_) => TaskState::Failed,
    };
    debug!(node = %exported, state = ?state, "external node settled");
    match state {
        TaskState::Success => NodeOutcome::Succeeded,
        _ => NodeOutcome::Unavailable,
    }
}
