// src/lifecycle/controller.rs

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::{BuildError, ControllerError};
use crate::lifecycle::preparer::BuildWorkPreparer;
use crate::lifecycle::{BuildWorkExecutor, Stoppable};
use crate::model::{BuildListenerBroadcast, BuildModel, BuildModelController, BuildResult, Settings};
use crate::plan::{ExecutionPlan, FinalizedExecutionPlan, WorkGraphBuilder};
use crate::result::{ExecutionResult, Failure};
use crate::state::{State, StateTransitionController};
use crate::tree::BuildIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    Configure,
    TaskGraph,
    Finished,
}

impl State for LifecycleState {}

type CompletionListener = Box<dyn FnOnce(&BuildIdentifier) + Send>;

/// Drives one build from configuration through execution to completion.
pub struct BuildLifecycleController {
    build: BuildIdentifier,
    state: StateTransitionController<LifecycleState>,
    model: Arc<dyn BuildModelController>,
    work_preparer: Box<dyn BuildWorkPreparer>,
    work_executor: Arc<dyn BuildWorkExecutor>,
    listeners: Arc<BuildListenerBroadcast>,
    services: Vec<Arc<dyn Stoppable>>,
    on_stopped: Mutex<Option<CompletionListener>>,
}

impl BuildLifecycleController {
    pub fn new(
        build: BuildIdentifier,
        model: Arc<dyn BuildModelController>,
        work_preparer: Box<dyn BuildWorkPreparer>,
        work_executor: Arc<dyn BuildWorkExecutor>,
        listeners: Arc<BuildListenerBroadcast>,
        services: Vec<Arc<dyn Stoppable>>,
    ) -> Self {
        let display_name = format!("state of {build}");
        Self {
            build,
            state: StateTransitionController::new(display_name, LifecycleState::Created),
            model,
            work_preparer,
            work_executor,
            listeners,
            services,
            on_stopped: Mutex::new(None),
        }
    }

    pub fn build(&self) -> &BuildIdentifier {
        &self.build
    }

    pub fn state(&self) -> LifecycleState {
        self.state.current_state()
    }

    /// "Configure" until tasks have been scheduled, "Build" afterwards.
    pub fn display_name(&self) -> &'static str {
        match self.state.current_state() {
            LifecycleState::Created | LifecycleState::Configure => "Configure",
            LifecycleState::TaskGraph | LifecycleState::Finished => "Build",
        }
    }

    /// Register a callback run once when the build is stopped.
    pub fn on_stopped(&self, listener: impl FnOnce(&BuildIdentifier) + Send + 'static) {
        *self.on_stopped.lock() = Some(Box::new(listener));
    }

    pub fn loaded_settings(&self) -> Result<Arc<Settings>, BuildError> {
        self.with_model(|model| model.loaded_settings())
    }

    pub fn configured_build(&self) -> Result<Arc<BuildModel>, BuildError> {
        self.with_model(|model| model.configured_model())
    }

    /// Run `action` against the model, then mark the build as configuring
    /// the first time that succeeds.
    fn with_model<T, F>(&self, action: F) -> Result<T, BuildError>
    where
        F: FnOnce(&dyn BuildModelController) -> Result<T, BuildError>,
    {
        let value = self
            .state
            .not_in_state_ignore_other_threads(LifecycleState::Finished, || {
                action(self.model.as_ref()).map_err(anyhow::Error::from)
            })?;
        if self.state.assert_in_state_or_later(LifecycleState::Configure).is_err() {
            self.state.transition_if_not_previously(
                LifecycleState::Created,
                LifecycleState::Configure,
                || Ok(()),
            )?;
        }
        Ok(value)
    }

    /// Configure the build and move it to the task graph stage.
    pub fn prepare_to_schedule(&self) -> Result<(), BuildError> {
        self.configured_build()?;
        self.state
            .maybe_transition(LifecycleState::Configure, LifecycleState::TaskGraph, || {
                debug!(build = %self.build, "ready to schedule tasks");
                Ok(())
            })?;
        Ok(())
    }

    pub fn new_execution_plan(&self) -> ExecutionPlan {
        self.work_preparer.new_execution_plan(&self.build)
    }

    pub fn schedule_requested_tasks(&self, plan: &mut ExecutionPlan) -> Result<(), BuildError> {
        let model = Arc::clone(&self.model);
        self.populate_work_graph(plan, move |builder| model.schedule_requested_tasks(builder))
    }

    pub fn schedule_tasks(&self, plan: &mut ExecutionPlan, selectors: &[String]) -> Result<(), BuildError> {
        let model = Arc::clone(&self.model);
        self.populate_work_graph(plan, move |builder| model.schedule_tasks(builder, selectors))
    }

    /// Add nodes to `plan` via `action`.
    pub fn populate_work_graph<F>(&self, plan: &mut ExecutionPlan, action: F) -> Result<(), BuildError>
    where
        F: FnOnce(&mut WorkGraphBuilder<'_>) -> Result<(), BuildError>,
    {
        self.prepare_to_schedule()?;
        let mut action = Some(action);
        let mut populate = |builder: &mut WorkGraphBuilder<'_>| match action.take() {
            Some(action) => action(builder),
            None => Ok(()),
        };
        self.state.in_state(LifecycleState::TaskGraph, || {
            self.work_preparer
                .populate_work_graph(self.model.as_ref(), plan, &mut populate)
                .map_err(anyhow::Error::from)
        })?;
        Ok(())
    }

    pub fn finalize_work_graph(&self, plan: ExecutionPlan) -> Result<FinalizedExecutionPlan, BuildError> {
        let finalized = self.state.in_state(LifecycleState::TaskGraph, || {
            self.work_preparer
                .finalize_work_graph(plan)
                .map_err(anyhow::Error::from)
        })?;
        Ok(finalized)
    }

    /// Execute a finalized plan. Failures are recorded and reported again
    /// when the build finishes.
    pub fn execute_tasks(&self, plan: &mut FinalizedExecutionPlan) -> ExecutionResult<()> {
        self.state.try_in_state(LifecycleState::TaskGraph, || {
            info!(build = %self.build, "executing tasks");
            self.work_executor.execute(plan)
        })
    }

    /// Finish the build, notifying `build_finished` listeners exactly once.
    ///
    /// The reported result combines `failure` with every failure recorded
    /// since the build started. Listener failures go to `collector`.
    pub fn finish_build(
        &self,
        failure: Option<Failure>,
        collector: &mut dyn FnMut(Failure),
    ) -> Result<(), ControllerError> {
        let action = self.display_name();
        let outcome = self.state.finish(LifecycleState::Finished, |recorded| {
            let combined = ExecutionResult::<()>::maybe_failed(failure).with_failures(recorded);
            let result = BuildResult {
                action,
                build: self.build.clone(),
                failure: combined.get_failure(),
            };
            info!(build = %self.build, action, success = result.is_success(), "build finished");
            self.listeners.build_finished(&result)
        })?;
        for failure in outcome.failures() {
            collector(failure.clone());
        }
        Ok(())
    }

    /// Stop the build's services. Only allowed before anything happened or
    /// after the build finished.
    pub fn stop(&self) -> ExecutionResult<()> {
        let state = self.state.current_state();
        if !matches!(state, LifecycleState::Created | LifecycleState::Finished) {
            return ExecutionResult::failed(ControllerError::WrongState(format!(
                "Cannot stop {} as it is in state {state:?}.",
                self.build
            )));
        }
        let result = ExecutionResult::for_each(&self.services, |service| service.stop());
        let on_stopped = self.on_stopped.lock().take();
        if let Some(listener) = on_stopped {
            listener(&self.build);
        }
        debug!(build = %self.build, "build stopped");
        result
    }

    /// Discard the realized model so the build can be configured again.
    pub fn reset_model(&self) -> Result<(), BuildError> {
        let from = self.state.current_state();
        match from {
            LifecycleState::Created => Ok(()),
            LifecycleState::Configure | LifecycleState::Finished => {
                self.state.restart(from, LifecycleState::Created, || {
                    self.model.reset().map_err(anyhow::Error::from)
                })?;
                Ok(())
            }
            LifecycleState::TaskGraph => Err(ControllerError::WrongState(format!(
                "Cannot reset the model of {} while it is in state {from:?}.",
                self.build
            ))
            .into()),
        }
    }
}
