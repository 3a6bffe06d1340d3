// src/tree/projects.rs

//! Project state and the project registries.
//!
//! Every project of every build is registered in the tree-wide
//! [`ProjectStateRegistry`]. Its mutable state is guarded by a reentrant
//! lock, so the same thread may nest `with_mutable_state` calls while other
//! threads wait.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use tracing::debug;

use crate::errors::ControllerError;
use crate::state::{State, StateTransitionController};
use crate::tree::path::{BuildIdentifier, Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectLifecycle {
    Unconfigured,
    Configured,
}

impl State for ProjectLifecycle {}

/// One project of one build.
pub struct ProjectState {
    build: BuildIdentifier,
    project_path: Path,
    identity_path: Path,
    lock: ReentrantMutex<()>,
    controller: StateTransitionController<ProjectLifecycle>,
}

impl ProjectState {
    fn new(build: BuildIdentifier, project_path: Path) -> Self {
        let identity_path = build.build_path().append(&project_path);
        let display_name = format!("project '{identity_path}'");
        Self {
            build,
            project_path,
            identity_path,
            lock: ReentrantMutex::new(()),
            controller: StateTransitionController::new(display_name, ProjectLifecycle::Unconfigured),
        }
    }

    pub fn build(&self) -> &BuildIdentifier {
        &self.build
    }

    /// Path of the project inside its build.
    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Path of the project inside the build tree.
    pub fn identity_path(&self) -> &Path {
        &self.identity_path
    }

    pub fn is_configured(&self) -> bool {
        self.controller.current_state() == ProjectLifecycle::Configured
    }

    /// Run `f` holding this project's mutable-state lock.
    pub fn with_mutable_state<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock.lock();
        f()
    }

    /// Configure the project once, under its mutable-state lock.
    pub fn ensure_configured<F>(&self, configure: F) -> Result<(), ControllerError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        self.with_mutable_state(|| {
            self.controller.maybe_transition(
                ProjectLifecycle::Unconfigured,
                ProjectLifecycle::Configured,
                configure,
            )
        })
    }
}

impl std::fmt::Debug for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectState")
            .field("identity_path", &self.identity_path)
            .field("state", &self.controller.current_state())
            .finish()
    }
}

/// The projects of a single build, in project path order.
#[derive(Debug, Default)]
pub struct BuildProjectRegistry {
    projects: BTreeMap<Path, Arc<ProjectState>>,
}

impl BuildProjectRegistry {
    pub fn get(&self, project_path: &Path) -> Option<&Arc<ProjectState>> {
        self.projects.get(project_path)
    }

    pub fn root_project(&self) -> Option<&Arc<ProjectState>> {
        self.projects.get(&Path::root())
    }

    pub fn projects(&self) -> impl Iterator<Item = &Arc<ProjectState>> {
        self.projects.values()
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Tree-wide registry of project state.
///
/// Keyed by (build path, project path) so that iteration, and therefore
/// lock acquisition, always happens in the same global order.
#[derive(Default)]
pub struct ProjectStateRegistry {
    projects: RwLock<BTreeMap<(Path, Path), Arc<ProjectState>>>,
}

impl ProjectStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the projects of `build`, returning that build's registry.
    pub fn register_projects(
        &self,
        build: &BuildIdentifier,
        project_paths: impl IntoIterator<Item = Path>,
    ) -> BuildProjectRegistry {
        let mut all = self.projects.write();
        let mut registry = BuildProjectRegistry::default();
        for project_path in project_paths {
            let key = (build.build_path().clone(), project_path.clone());
            let state = all
                .entry(key)
                .or_insert_with(|| Arc::new(ProjectState::new(build.clone(), project_path.clone())))
                .clone();
            registry.projects.insert(project_path, state);
        }
        debug!(build = %build, projects = registry.len(), "registered projects");
        registry
    }

    /// Forget every project of `build`.
    pub fn discard_projects(&self, build: &BuildIdentifier) {
        self.projects
            .write()
            .retain(|(build_path, _), _| build_path != build.build_path());
        debug!(build = %build, "discarded projects");
    }

    pub fn all_projects(&self) -> Vec<Arc<ProjectState>> {
        self.projects.read().values().cloned().collect()
    }

    /// Run `f` holding the mutable-state lock of every registered project.
    ///
    /// Locks are taken in registry order.
    pub fn with_mutable_state_of_all_projects<R>(&self, f: impl FnOnce() -> R) -> R {
        let projects = self.all_projects();
        let _guards: Vec<ReentrantMutexGuard<'_, ()>> =
            projects.iter().map(|project| project.lock.lock()).collect();
        f()
    }
}
