// src/tree/registry.rs

//! Registry of the builds in a tree.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::model::BuildDefinition;
use crate::errors::{BuildError, WorkGraphError};
use crate::plan::IncludedTaskResolver;
use crate::tree::build_state::{
    BuildServices, BuildState, IncludedBuildState, RootBuildState, TreeServices,
};
use crate::tree::path::{BuildIdentifier, Path};
use crate::workgraph::ExportedTaskNode;

#[derive(Default)]
struct Builds {
    root: Option<Arc<RootBuildState>>,
    by_id: BTreeMap<BuildIdentifier, Arc<dyn BuildState>>,
    by_name: BTreeMap<String, BuildIdentifier>,
}

/// Every build of the tree, by identifier and by name.
pub struct BuildStateRegistry {
    this: Weak<BuildStateRegistry>,
    services: TreeServices,
    builds: RwLock<Builds>,
}

impl BuildStateRegistry {
    pub fn new(services: TreeServices) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            services,
            builds: RwLock::new(Builds::default()),
        })
    }

    pub fn services(&self) -> &TreeServices {
        &self.services
    }

    fn resolver(&self) -> Arc<dyn IncludedTaskResolver> {
        Arc::new(RegistryTaskResolver {
            registry: self.this.clone(),
        })
    }

    pub fn add_root_build(&self, definition: BuildDefinition) -> Result<Arc<RootBuildState>, BuildError> {
        let identifier = BuildIdentifier::root();
        if self.builds.read().root.is_some() {
            return Err(BuildError::DuplicateBuild(identifier.to_string()));
        }
        let name = definition.name.clone();
        let services = BuildServices::create(&identifier, definition, &self.services, self.resolver());
        let root = Arc::new(RootBuildState::new(name.clone(), services));
        self.register(Arc::clone(&root) as Arc<dyn BuildState>, name)?;
        self.builds.write().root = Some(Arc::clone(&root));
        info!(build = %identifier, "root build added");
        Ok(root)
    }

    pub fn add_included_build(
        &self,
        definition: BuildDefinition,
    ) -> Result<Arc<IncludedBuildState>, BuildError> {
        self.root_build()?.assert_can_add(&definition)?;
        let identifier = BuildIdentifier::new(Path::root().child(&definition.name));
        if self.builds.read().by_id.contains_key(&identifier) {
            return Err(BuildError::DuplicateBuild(identifier.to_string()));
        }
        let name = definition.name.clone();
        let services = BuildServices::create(&identifier, definition, &self.services, self.resolver());
        let build = Arc::new(IncludedBuildState::new(identifier.clone(), name.clone(), services));
        self.register(Arc::clone(&build) as Arc<dyn BuildState>, name)?;
        info!(build = %identifier, "included build added");
        Ok(build)
    }

    fn register(&self, build: Arc<dyn BuildState>, name: String) -> Result<(), BuildError> {
        let identifier = build.build_identifier().clone();
        let mut builds = self.builds.write();
        if builds.by_id.contains_key(&identifier) || builds.by_name.contains_key(&name) {
            return Err(BuildError::DuplicateBuild(identifier.to_string()));
        }

        let registry = self.this.clone();
        build.lifecycle().on_stopped(move |stopped| {
            if let Some(registry) = registry.upgrade() {
                registry.remove(stopped);
            }
        });
        builds.by_name.insert(name, identifier.clone());
        builds.by_id.insert(identifier, build);
        Ok(())
    }

    fn remove(&self, build: &BuildIdentifier) {
        let mut builds = self.builds.write();
        builds.by_id.remove(build);
        builds.by_name.retain(|_, id| id != build);
        if build == &BuildIdentifier::root() {
            builds.root = None;
        }
        debug!(build = %build, "build removed from registry");
    }

    pub fn root_build(&self) -> Result<Arc<RootBuildState>, BuildError> {
        self.builds
            .read()
            .root
            .clone()
            .ok_or_else(|| BuildError::BuildNotFound(BuildIdentifier::root().to_string()))
    }

    pub fn get_build(&self, build: &BuildIdentifier) -> Result<Arc<dyn BuildState>, BuildError> {
        self.builds
            .read()
            .by_id
            .get(build)
            .cloned()
            .ok_or_else(|| BuildError::BuildNotFound(build.to_string()))
    }

    pub fn included_build(&self, name: &str) -> Result<Arc<dyn BuildState>, BuildError> {
        let identifier = self
            .builds
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::BuildNotFound(name.to_string()))?;
        self.get_build(&identifier)
    }

    /// Every build, in build path order.
    pub fn builds(&self) -> Vec<Arc<dyn BuildState>> {
        self.builds.read().by_id.values().cloned().collect()
    }

    /// Visit every build in build path order.
    pub fn visit_builds<F>(&self, mut visitor: F)
    where
        F: FnMut(&dyn BuildState),
    {
        for build in self.builds() {
            visitor(build.as_ref());
        }
    }
}

/// Resolves references to tasks of included builds through the registry.
struct RegistryTaskResolver {
    registry: Weak<BuildStateRegistry>,
}

impl IncludedTaskResolver for RegistryTaskResolver {
    fn resolve(&self, build: &str, task: &Path) -> Result<Arc<ExportedTaskNode>, BuildError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| BuildError::BuildNotFound(build.to_string()))?;
        let target = registry.included_build(build)?;
        let model = target.lifecycle().configured_build()?;
        if model.task(task).is_none() {
            return Err(WorkGraphError::UnknownTask {
                build: target.display_name(),
                task: task.to_string(),
            }
            .into());
        }
        Ok(target.work_graph().locate_task(task))
    }
}
