// src/errors.rs

//! Crate-wide error types.
//!
//! - [`ControllerError`] is returned by every guarded state-machine operation.
//! - [`WorkGraphError`] covers misuse of a build's work graph.
//! - [`BuildError`] is the umbrella error used at build/tree boundaries.

use thiserror::Error;

use crate::result::Failure;

/// Failure of a [`StateTransitionController`](crate::state::StateTransitionController)
/// operation.
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    /// The controller is not in a state that allows the operation.
    #[error("{0}")]
    WrongState(String),

    /// Another thread currently owns the controller.
    #[error("{0}")]
    ConcurrentTransition(String),

    /// An earlier operation on the controller failed; nothing but `finish`
    /// (or `restart`) can proceed until that failure is consumed.
    #[error("Cannot use {display_name} as a previous transition failed.")]
    PreviousFailure {
        display_name: String,
        #[source]
        cause: Failure,
    },

    /// The action run by this operation failed. The failure is now the
    /// controller's terminal failure.
    #[error(transparent)]
    Failed(Failure),
}

impl ControllerError {
    /// The user failure carried by this error, if any.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ControllerError::PreviousFailure { cause, .. } => Some(cause),
            ControllerError::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Misuse of a [`BuildWorkGraph`](crate::workgraph::BuildWorkGraph).
#[derive(Error, Debug, Clone)]
pub enum WorkGraphError {
    #[error("{graph} can only be used by the thread that created it")]
    NotOwner { graph: String },

    #[error("{build} already has an active work graph")]
    AlreadyActive { build: String },

    #[error("task node '{task}' does not belong to {build}")]
    ForeignNode { build: String, task: String },

    #[error("task '{task}' is not defined in {build}")]
    UnknownTask { build: String, task: String },

    #[error("work graph for {build} has not been finalized")]
    NotFinalized { build: String },

    #[error("work graph for {build} has already been finalized")]
    AlreadyFinalized { build: String },
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    #[error("Build not found: {0}")]
    BuildNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Projects of {0} have not been loaded")]
    ProjectsNotLoaded(String),

    #[error("{0}")]
    UnsupportedInclusion(String),

    #[error("Build {0} has already been added to the build tree")]
    DuplicateBuild(String),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    WorkGraph(#[from] WorkGraphError),

    #[error(transparent)]
    Failed(#[from] Failure),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convert a build error back into a failure record, reusing the original
/// record when the error merely carries one.
impl From<BuildError> for Failure {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Failed(failure) => failure,
            BuildError::Controller(ControllerError::Failed(failure)) => failure,
            BuildError::Other(err) => Failure::from(err),
            other => Failure::new(other),
        }
    }
}

impl From<ControllerError> for Failure {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::Failed(failure) => failure,
            other => Failure::new(other),
        }
    }
}

impl From<WorkGraphError> for Failure {
    fn from(err: WorkGraphError) -> Self {
        Failure::new(err)
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BuildError>;
