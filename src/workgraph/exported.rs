// src/workgraph/exported.rs

//! Tasks of one build that other builds depend on.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::tree::{BuildIdentifier, Path};

/// What a consuming build sees of an exported task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Success,
    Failed,
    Waiting,
}

/// Scheduling state of an exported task within its owning build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLifecycle {
    /// Not part of any work graph.
    Idle,
    /// Scheduled by the current work graph.
    Scheduled,
    /// The current work graph is running without it.
    NotScheduled,
    /// The work graph that scheduled it has finished.
    Finished,
}

#[derive(Debug)]
struct NodeInner {
    lifecycle: NodeLifecycle,
    outcome: Option<bool>,
}

impl NodeInner {
    fn task_state(&self) -> TaskState {
        match (self.lifecycle, self.outcome) {
            (NodeLifecycle::Idle | NodeLifecycle::NotScheduled, _) => TaskState::Success,
            (NodeLifecycle::Scheduled, None) => TaskState::Waiting,
            (_, Some(true)) => TaskState::Success,
            (_, _) => TaskState::Failed,
        }
    }
}

/// A task in one build that tasks of other builds can wait on.
///
/// The state is published through a `watch` channel so waiters in other
/// builds wake as soon as it settles.
pub struct ExportedTaskNode {
    build: BuildIdentifier,
    task_path: Path,
    inner: Mutex<NodeInner>,
    state: watch::Sender<TaskState>,
}

impl ExportedTaskNode {
    pub fn new(build: BuildIdentifier, task_path: Path) -> Self {
        let (state, _) = watch::channel(TaskState::Success);
        Self {
            build,
            task_path,
            inner: Mutex::new(NodeInner {
                lifecycle: NodeLifecycle::Idle,
                outcome: None,
            }),
            state,
        }
    }

    pub fn build(&self) -> &BuildIdentifier {
        &self.build
    }

    pub fn task_path(&self) -> &Path {
        &self.task_path
    }

    pub fn lifecycle(&self) -> NodeLifecycle {
        self.inner.lock().lifecycle
    }

    pub fn task_state(&self) -> TaskState {
        self.inner.lock().task_state()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Whether the current work graph still has to schedule this task.
    pub fn should_schedule(&self) -> bool {
        matches!(
            self.inner.lock().lifecycle,
            NodeLifecycle::Idle | NodeLifecycle::NotScheduled
        )
    }

    pub fn when_scheduled(&self) {
        self.update(|inner| {
            inner.lifecycle = NodeLifecycle::Scheduled;
            inner.outcome = None;
        });
    }

    pub fn before_execution(&self) {
        self.update(|inner| {
            if inner.lifecycle == NodeLifecycle::Idle {
                inner.lifecycle = NodeLifecycle::NotScheduled;
            }
        });
    }

    pub fn after_execution(&self) {
        self.update(|inner| match inner.lifecycle {
            NodeLifecycle::Scheduled => inner.lifecycle = NodeLifecycle::Finished,
            NodeLifecycle::NotScheduled => inner.lifecycle = NodeLifecycle::Idle,
            NodeLifecycle::Idle | NodeLifecycle::Finished => {}
        });
    }

    /// Record the outcome of the task's execution.
    pub fn task_completed(&self, success: bool) {
        self.update(|inner| inner.outcome = Some(success));
    }

    /// Make a finished task available to a new work graph.
    pub fn reset(&self) {
        self.update(|inner| {
            if inner.lifecycle == NodeLifecycle::Finished {
                inner.lifecycle = NodeLifecycle::Idle;
                inner.outcome = None;
            }
        });
    }

    fn update(&self, f: impl FnOnce(&mut NodeInner)) {
        let mut inner = self.inner.lock();
        f(&mut inner);
        let state = inner.task_state();
        trace!(node = %self, lifecycle = ?inner.lifecycle, state = ?state, "exported node updated");
        self.state.send_replace(state);
    }
}

impl fmt::Display for ExportedTaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}' of {}", self.task_path, self.build)
    }
}

impl fmt::Debug for ExportedTaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedTaskNode")
            .field("build", &self.build)
            .field("task_path", &self.task_path)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
