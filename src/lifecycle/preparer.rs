// src/lifecycle/preparer.rs

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::errors::BuildError;
use crate::model::BuildModelController;
use crate::operations::{BuildOperationRunner, CALCULATE_TASK_GRAPH, CalculateTaskGraphResult};
use crate::plan::{ExecutionPlan, FinalizedExecutionPlan, IncludedTaskResolver, WorkGraphBuilder};
use crate::tree::BuildIdentifier;

/// Population action handed to [`BuildWorkPreparer::populate_work_graph`].
pub type PopulateAction<'f> =
    dyn FnMut(&mut WorkGraphBuilder<'_>) -> Result<(), BuildError> + 'f;

/// Creates, populates and finalizes execution plans for one build.
pub trait BuildWorkPreparer: Send + Sync {
    fn new_execution_plan(&self, build: &BuildIdentifier) -> ExecutionPlan;

    fn populate_work_graph(
        &self,
        model: &dyn BuildModelController,
        plan: &mut ExecutionPlan,
        action: &mut PopulateAction<'_>,
    ) -> Result<(), BuildError>;

    fn finalize_work_graph(&self, plan: ExecutionPlan) -> Result<FinalizedExecutionPlan, BuildError>;
}

pub struct DefaultBuildWorkPreparer {
    resolver: Option<Arc<dyn IncludedTaskResolver>>,
    continue_on_failure: bool,
}

impl DefaultBuildWorkPreparer {
    pub fn new(resolver: Option<Arc<dyn IncludedTaskResolver>>, continue_on_failure: bool) -> Self {
        Self {
            resolver,
            continue_on_failure,
        }
    }
}

impl BuildWorkPreparer for DefaultBuildWorkPreparer {
    fn new_execution_plan(&self, build: &BuildIdentifier) -> ExecutionPlan {
        ExecutionPlan::new(build.clone(), self.resolver.clone())
    }

    fn populate_work_graph(
        &self,
        model: &dyn BuildModelController,
        plan: &mut ExecutionPlan,
        action: &mut PopulateAction<'_>,
    ) -> Result<(), BuildError> {
        let model = model.configured_model()?;
        let mut builder = WorkGraphBuilder::new(plan, &model);
        action(&mut builder)?;
        debug!(build = %plan.build(), nodes = plan.len(), "work graph populated");
        Ok(())
    }

    fn finalize_work_graph(&self, plan: ExecutionPlan) -> Result<FinalizedExecutionPlan, BuildError> {
        plan.finalize(self.continue_on_failure)
    }
}

/// Wraps plan population in a "Calculate task graph" build operation whose
/// result describes the populated plan.
pub struct OperationFiringWorkPreparer {
    delegate: Box<dyn BuildWorkPreparer>,
    operations: Arc<BuildOperationRunner>,
}

impl OperationFiringWorkPreparer {
    pub fn new(delegate: Box<dyn BuildWorkPreparer>, operations: Arc<BuildOperationRunner>) -> Self {
        Self {
            delegate,
            operations,
        }
    }
}

impl BuildWorkPreparer for OperationFiringWorkPreparer {
    fn new_execution_plan(&self, build: &BuildIdentifier) -> ExecutionPlan {
        self.delegate.new_execution_plan(build)
    }

    fn populate_work_graph(
        &self,
        model: &dyn BuildModelController,
        plan: &mut ExecutionPlan,
        action: &mut PopulateAction<'_>,
    ) -> Result<(), BuildError> {
        let details = json!({ "buildPath": plan.build().build_path() });
        self.operations.call(CALCULATE_TASK_GRAPH, details, |context| {
            self.delegate.populate_work_graph(model, plan, action)?;
            context.set_result(&CalculateTaskGraphResult::from_plan(plan))
        })
    }

    fn finalize_work_graph(&self, plan: ExecutionPlan) -> Result<FinalizedExecutionPlan, BuildError> {
        self.delegate.finalize_work_graph(plan)
    }
}
