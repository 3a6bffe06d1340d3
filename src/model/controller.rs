// src/model/controller.rs

//! Lazy realization of a build's settings and project model.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::model::BuildDefinition;
use crate::errors::BuildError;
use crate::lifecycle::Stoppable;
use crate::model::build_model::{BuildModel, ProjectModel, Settings};
use crate::model::listener::BuildListenerBroadcast;
use crate::plan::WorkGraphBuilder;
use crate::state::{State, StateTransitionController};
use crate::tree::{BuildIdentifier, BuildProjectRegistry, ProjectStateRegistry};

/// Realizes the settings and model of one build on demand.
///
/// Every accessor may trigger realization and may fail. Once realization
/// has failed, every later call fails too.
pub trait BuildModelController: Send + Sync {
    fn loaded_settings(&self) -> Result<Arc<Settings>, BuildError>;

    fn configured_model(&self) -> Result<Arc<BuildModel>, BuildError>;

    /// The build's projects, once settings have been loaded.
    fn projects(&self) -> Option<Arc<BuildProjectRegistry>>;

    /// Add the build's default requested (and excluded) tasks.
    fn schedule_requested_tasks(&self, builder: &mut WorkGraphBuilder<'_>) -> Result<(), BuildError>;

    /// Add the tasks matched by `selectors`.
    fn schedule_tasks(
        &self,
        builder: &mut WorkGraphBuilder<'_>,
        selectors: &[String],
    ) -> Result<(), BuildError>;

    /// Discard the realized model so it is realized again on next use.
    fn reset(&self) -> Result<(), BuildError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ModelStage {
    Created,
    SettingsLoaded,
    Configured,
}

impl State for ModelStage {}

pub struct DefaultBuildModelController {
    build: BuildIdentifier,
    definition: BuildDefinition,
    project_states: Arc<ProjectStateRegistry>,
    listeners: Arc<BuildListenerBroadcast>,
    state: StateTransitionController<ModelStage>,
    settings: Mutex<Option<Arc<Settings>>>,
    projects: Mutex<Option<Arc<BuildProjectRegistry>>>,
    model: Mutex<Option<Arc<BuildModel>>>,
}

impl DefaultBuildModelController {
    pub fn new(
        build: BuildIdentifier,
        definition: BuildDefinition,
        project_states: Arc<ProjectStateRegistry>,
        listeners: Arc<BuildListenerBroadcast>,
    ) -> Self {
        let display_name = format!("model of {build}");
        Self {
            build,
            definition,
            project_states,
            listeners,
            state: StateTransitionController::new(display_name, ModelStage::Created),
            settings: Mutex::new(None),
            projects: Mutex::new(None),
            model: Mutex::new(None),
        }
    }

    fn load_settings(&self) -> anyhow::Result<()> {
        let settings = Arc::new(Settings::from_definition(&self.build, &self.definition));
        let registry = self
            .project_states
            .register_projects(&self.build, settings.project_paths.iter().cloned());
        *self.projects.lock() = Some(Arc::new(registry));
        self.listeners.settings_evaluated(&settings)?;
        debug!(build = %self.build, projects = settings.project_paths.len(), "settings loaded");
        *self.settings.lock() = Some(settings);
        Ok(())
    }

    fn configure(&self, settings: Arc<Settings>) -> anyhow::Result<()> {
        let projects = self
            .projects()
            .ok_or_else(|| BuildError::ProjectsNotLoaded(self.build.to_string()))?;

        let mut configured = BTreeMap::new();
        for project in projects.projects() {
            let path = project.project_path();
            let definition = self
                .definition
                .projects
                .get(path)
                .ok_or_else(|| BuildError::ProjectNotFound(format!("{path} in {}", self.build)))?;

            let mut realized = None;
            project.ensure_configured(|| {
                realized = Some(ProjectModel::configure(path, definition)?);
                Ok(())
            })?;
            // Already configured by an earlier model of this build.
            let model = match realized {
                Some(model) => model,
                None => ProjectModel::configure(path, definition)?,
            };
            configured.insert(path.clone(), model);
        }

        let model = Arc::new(BuildModel::new(settings, configured, &self.definition));
        self.listeners.projects_evaluated(&model)?;
        info!(build = %self.build, "build configured");
        *self.model.lock() = Some(model);
        Ok(())
    }
}

impl BuildModelController for DefaultBuildModelController {
    fn loaded_settings(&self) -> Result<Arc<Settings>, BuildError> {
        self.state.transition_if_not_previously(
            ModelStage::Created,
            ModelStage::SettingsLoaded,
            || self.load_settings(),
        )?;
        self.settings
            .lock()
            .clone()
            .ok_or_else(|| BuildError::ProjectsNotLoaded(self.build.to_string()))
    }

    fn configured_model(&self) -> Result<Arc<BuildModel>, BuildError> {
        let settings = self.loaded_settings()?;
        self.state.transition_if_not_previously(
            ModelStage::SettingsLoaded,
            ModelStage::Configured,
            || self.configure(settings),
        )?;
        self.model
            .lock()
            .clone()
            .ok_or_else(|| BuildError::ProjectsNotLoaded(self.build.to_string()))
    }

    fn projects(&self) -> Option<Arc<BuildProjectRegistry>> {
        self.projects.lock().clone()
    }

    fn schedule_requested_tasks(&self, builder: &mut WorkGraphBuilder<'_>) -> Result<(), BuildError> {
        builder.add_requested_tasks()
    }

    fn schedule_tasks(
        &self,
        builder: &mut WorkGraphBuilder<'_>,
        selectors: &[String],
    ) -> Result<(), BuildError> {
        let excluded = builder.model().excluded_tasks().to_vec();
        builder.exclude_tasks(&excluded)?;
        builder.add_task_selectors(selectors)
    }

    fn reset(&self) -> Result<(), BuildError> {
        let from = self.state.current_state();
        self.state.restart(from, ModelStage::Created, || {
            self.discard();
            Ok(())
        })?;
        debug!(build = %self.build, "model reset");
        Ok(())
    }
}

impl DefaultBuildModelController {
    fn discard(&self) {
        *self.model.lock() = None;
        *self.settings.lock() = None;
        *self.projects.lock() = None;
        self.project_states.discard_projects(&self.build);
    }
}

impl Stoppable for DefaultBuildModelController {
    fn stop(&self) -> anyhow::Result<()> {
        self.discard();
        Ok(())
    }
}
