// src/tree/build_state.rs

//! The builds of a tree and the services each one owns.

use std::sync::Arc;

use tracing::debug;

use crate::config::model::{BuildDefinition, TreeOptions};
use crate::errors::BuildError;
use crate::lifecycle::{
    BuildLifecycleController, DefaultBuildWorkPreparer, OperationFiringWorkPreparer, Stoppable,
};
use crate::model::{BuildListenerBroadcast, BuildModelController, DefaultBuildModelController};
use crate::operations::BuildOperationRunner;
use crate::plan::{IncludedTaskResolver, NodeExecutor, PlanExecutor};
use crate::result::ExecutionResult;
use crate::tree::path::{BuildIdentifier, Path};
use crate::tree::projects::{BuildProjectRegistry, ProjectStateRegistry};
use crate::workgraph::BuildWorkGraphController;

/// Services shared by every build in the tree.
#[derive(Clone)]
pub struct TreeServices {
    pub options: TreeOptions,
    pub project_states: Arc<ProjectStateRegistry>,
    pub operations: Arc<BuildOperationRunner>,
    pub listeners: Arc<BuildListenerBroadcast>,
    pub node_executor: Arc<dyn NodeExecutor>,
}

impl TreeServices {
    pub fn new(options: TreeOptions, node_executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            options,
            project_states: Arc::new(ProjectStateRegistry::new()),
            operations: Arc::new(BuildOperationRunner::new()),
            listeners: Arc::new(BuildListenerBroadcast::new()),
            node_executor,
        }
    }
}

/// The controllers owned by one build.
pub struct BuildServices {
    model: Arc<DefaultBuildModelController>,
    lifecycle: Arc<BuildLifecycleController>,
    work_graph: Arc<BuildWorkGraphController>,
}

impl BuildServices {
    pub fn create(
        build: &BuildIdentifier,
        definition: BuildDefinition,
        tree: &TreeServices,
        resolver: Arc<dyn IncludedTaskResolver>,
    ) -> Self {
        let model = Arc::new(DefaultBuildModelController::new(
            build.clone(),
            definition,
            Arc::clone(&tree.project_states),
            Arc::clone(&tree.listeners),
        ));
        let preparer = OperationFiringWorkPreparer::new(
            Box::new(DefaultBuildWorkPreparer::new(
                Some(resolver),
                tree.options.continue_on_failure,
            )),
            Arc::clone(&tree.operations),
        );
        let executor = Arc::new(PlanExecutor::new(
            Arc::clone(&tree.node_executor),
            tree.options.max_workers,
        ));
        let stoppables: Vec<Arc<dyn Stoppable>> = vec![model.clone()];
        let lifecycle = Arc::new(BuildLifecycleController::new(
            build.clone(),
            model.clone(),
            Box::new(preparer),
            executor,
            Arc::clone(&tree.listeners),
            stoppables,
        ));
        let work_graph = Arc::new(BuildWorkGraphController::new(
            build.clone(),
            Arc::clone(&lifecycle),
            Arc::clone(&tree.project_states),
        ));
        Self {
            model,
            lifecycle,
            work_graph,
        }
    }

    pub fn model(&self) -> &Arc<DefaultBuildModelController> {
        &self.model
    }

    pub fn lifecycle(&self) -> &Arc<BuildLifecycleController> {
        &self.lifecycle
    }

    pub fn work_graph(&self) -> &Arc<BuildWorkGraphController> {
        &self.work_graph
    }
}

/// A build participating in the tree.
pub trait BuildState: Send + Sync {
    fn build_identifier(&self) -> &BuildIdentifier;

    fn name(&self) -> &str;

    fn services(&self) -> &BuildServices;

    fn is_root(&self) -> bool {
        false
    }

    fn identity_path(&self) -> &Path {
        self.build_identifier().build_path()
    }

    fn display_name(&self) -> String {
        self.build_identifier().to_string()
    }

    /// Whether a build described by `definition` may be added to the tree
    /// by this build.
    fn assert_can_add(&self, definition: &BuildDefinition) -> Result<(), BuildError> {
        Err(BuildError::UnsupportedInclusion(format!(
            "{} cannot include build '{}'.",
            self.display_name(),
            definition.name
        )))
    }

    fn lifecycle(&self) -> &Arc<BuildLifecycleController> {
        self.services().lifecycle()
    }

    fn work_graph(&self) -> &Arc<BuildWorkGraphController> {
        self.services().work_graph()
    }

    fn ensure_projects_loaded(&self) -> Result<(), BuildError> {
        self.lifecycle().loaded_settings().map(|_| ())
    }

    fn ensure_projects_configured(&self) -> Result<(), BuildError> {
        self.lifecycle().configured_build().map(|_| ())
    }

    fn projects(&self) -> Result<Arc<BuildProjectRegistry>, BuildError> {
        self.services()
            .model()
            .projects()
            .ok_or_else(|| BuildError::ProjectsNotLoaded(self.display_name()))
    }

    fn before_model_reset(&self) -> ExecutionResult<()> {
        ExecutionResult::maybe_failing(|| {
            self.work_graph().reset_nodes()?;
            Ok(())
        })
    }

    fn reset_model(&self) -> ExecutionResult<()> {
        ExecutionResult::maybe_failing(|| {
            self.lifecycle().reset_model()?;
            Ok(())
        })
    }

    fn before_model_discarded(&self, failed: bool) -> ExecutionResult<()> {
        ExecutionResult::maybe_failing(|| {
            debug!(build = %self.build_identifier(), failed, "discarding model");
            self.work_graph().discard_nodes(failed);
            Ok(())
        })
    }
}

/// The build at the root of the tree.
pub struct RootBuildState {
    identifier: BuildIdentifier,
    name: String,
    services: BuildServices,
}

impl RootBuildState {
    pub(crate) fn new(name: String, services: BuildServices) -> Self {
        Self {
            identifier: BuildIdentifier::root(),
            name,
            services,
        }
    }
}

impl BuildState for RootBuildState {
    fn build_identifier(&self) -> &BuildIdentifier {
        &self.identifier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn services(&self) -> &BuildServices {
        &self.services
    }

    fn is_root(&self) -> bool {
        true
    }

    fn assert_can_add(&self, definition: &BuildDefinition) -> Result<(), BuildError> {
        if definition.name == self.name {
            return Err(BuildError::UnsupportedInclusion(format!(
                "Included build '{}' has the same name as the root build.",
                definition.name
            )));
        }
        Ok(())
    }
}

/// A build included into the tree by the root build.
pub struct IncludedBuildState {
    identifier: BuildIdentifier,
    name: String,
    services: BuildServices,
}

impl IncludedBuildState {
    pub(crate) fn new(identifier: BuildIdentifier, name: String, services: BuildServices) -> Self {
        Self {
            identifier,
            name,
            services,
        }
    }
}

impl BuildState for IncludedBuildState {
    fn build_identifier(&self) -> &BuildIdentifier {
        &self.identifier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn services(&self) -> &BuildServices {
        &self.services
    }
}
