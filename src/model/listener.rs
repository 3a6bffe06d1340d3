// src/model/listener.rs

//! Build listeners and their broadcast.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::model::build_model::{BuildModel, Settings};
use crate::result::{ExecutionResult, Failure};
use crate::tree::BuildIdentifier;

/// What a finished build reports to its listeners.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// `"Configure"` or `"Build"`, depending on how far the build got.
    pub action: &'static str,
    pub build: BuildIdentifier,
    pub failure: Option<Failure>,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Hooks into a build's lifecycle. All methods default to doing nothing.
pub trait BuildListener: Send + Sync {
    fn settings_evaluated(&self, _settings: &Settings) -> anyhow::Result<()> {
        Ok(())
    }

    fn projects_evaluated(&self, _model: &BuildModel) -> anyhow::Result<()> {
        Ok(())
    }

    fn build_finished(&self, _result: &BuildResult) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fans a notification out to every registered listener.
#[derive(Default)]
pub struct BuildListenerBroadcast {
    listeners: RwLock<Vec<Arc<dyn BuildListener>>>,
}

impl BuildListenerBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn BuildListener>) {
        self.listeners.write().push(listener);
    }

    fn snapshot(&self) -> Vec<Arc<dyn BuildListener>> {
        self.listeners.read().clone()
    }

    /// Stops at the first failing listener.
    pub fn settings_evaluated(&self, settings: &Settings) -> anyhow::Result<()> {
        for listener in self.snapshot() {
            listener.settings_evaluated(settings)?;
        }
        Ok(())
    }

    /// Stops at the first failing listener.
    pub fn projects_evaluated(&self, model: &BuildModel) -> anyhow::Result<()> {
        for listener in self.snapshot() {
            listener.projects_evaluated(model)?;
        }
        Ok(())
    }

    /// Notifies every listener, collecting all failures.
    pub fn build_finished(&self, result: &BuildResult) -> ExecutionResult<()> {
        let outcome = ExecutionResult::for_each(self.snapshot(), |listener| {
            listener.build_finished(result)
        });
        if !outcome.is_success() {
            warn!(build = %result.build, failures = outcome.failures().len(), "build finished listener failed");
        }
        outcome
    }
}
