// src/model/build_model.rs

//! The realized settings and project model of one build.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::model::{BuildDefinition, ProjectDefinition};
use crate::errors::BuildError;
use crate::tree::{BuildIdentifier, Path};

/// Outcome of loading a build's settings: which projects exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub build: BuildIdentifier,
    pub build_name: String,
    pub project_paths: Vec<Path>,
}

impl Settings {
    pub fn from_definition(build: &BuildIdentifier, definition: &BuildDefinition) -> Self {
        Self {
            build: build.clone(),
            build_name: definition.name.clone(),
            project_paths: definition.projects.keys().cloned().collect(),
        }
    }
}

/// A task dependency on a task of an included build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedTask {
    pub build: String,
    pub task: Path,
}

/// A configured task with its dependencies resolved to task paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub path: Path,
    pub cmd: Option<String>,
    pub dependencies: Vec<Path>,
    pub transforms: Vec<String>,
    pub included: Vec<IncludedTask>,
}

impl TaskSpec {
    pub fn name(&self) -> &str {
        self.path.name().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectModel {
    pub path: Path,
    pub tasks: BTreeMap<String, TaskSpec>,
}

impl ProjectModel {
    /// Resolve every task of `definition`.
    pub fn configure(path: &Path, definition: &ProjectDefinition) -> Result<Self, BuildError> {
        let mut tasks = BTreeMap::new();
        for (name, task) in &definition.tasks {
            let dependencies = task
                .after
                .iter()
                .map(|reference| resolve_task_path(path, reference))
                .collect::<Result<Vec<_>, _>>()?;
            let included = task
                .included
                .iter()
                .map(|reference| {
                    Ok(IncludedTask {
                        build: reference.build.clone(),
                        task: Path::parse(&reference.task)?,
                    })
                })
                .collect::<Result<Vec<_>, BuildError>>()?;
            tasks.insert(
                name.clone(),
                TaskSpec {
                    path: path.child(name),
                    cmd: task.cmd.clone(),
                    dependencies,
                    transforms: task.transforms.clone(),
                    included,
                },
            );
        }
        Ok(Self {
            path: path.clone(),
            tasks,
        })
    }
}

/// The configured model of a build.
#[derive(Debug, Clone)]
pub struct BuildModel {
    identifier: BuildIdentifier,
    settings: Arc<Settings>,
    projects: BTreeMap<Path, ProjectModel>,
    requested_tasks: Vec<String>,
    excluded_tasks: Vec<String>,
}

impl BuildModel {
    pub fn new(
        settings: Arc<Settings>,
        projects: BTreeMap<Path, ProjectModel>,
        definition: &BuildDefinition,
    ) -> Self {
        Self {
            identifier: settings.build.clone(),
            settings,
            projects,
            requested_tasks: definition.requested_tasks.clone(),
            excluded_tasks: definition.excluded_tasks.clone(),
        }
    }

    pub fn identifier(&self) -> &BuildIdentifier {
        &self.identifier
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectModel> {
        self.projects.values()
    }

    pub fn requested_tasks(&self) -> &[String] {
        &self.requested_tasks
    }

    pub fn excluded_tasks(&self) -> &[String] {
        &self.excluded_tasks
    }

    pub fn task(&self, path: &Path) -> Option<&TaskSpec> {
        let project = path.parent()?;
        let name = path.name()?;
        self.projects.get(&project)?.tasks.get(name)
    }

    /// Tasks matched by `selector`.
    ///
    /// `:a:b` names one task exactly. A bare name matches the task of that
    /// name in every project, in project path order.
    pub fn select_tasks(&self, selector: &str) -> Result<Vec<&TaskSpec>, BuildError> {
        let selected: Vec<&TaskSpec> = if selector.starts_with(Path::SEPARATOR) {
            let path = Path::parse(selector)?;
            self.task(&path).into_iter().collect()
        } else {
            self.projects
                .values()
                .filter_map(|project| project.tasks.get(selector))
                .collect()
        };
        if selected.is_empty() {
            return Err(BuildError::TaskNotFound(format!(
                "'{selector}' in {}",
                self.identifier
            )));
        }
        Ok(selected)
    }
}

/// Resolve a task reference made from `project`: a bare name is a task of
/// the same project, anything starting with `:` is an absolute task path.
pub fn resolve_task_path(project: &Path, reference: &str) -> Result<Path, BuildError> {
    if reference.starts_with(Path::SEPARATOR) {
        let path = Path::parse(reference)?;
        if path.is_root() {
            return Err(BuildError::ConfigError(format!(
                "'{reference}' is not a task path"
            )));
        }
        Ok(path)
    } else if reference.is_empty() || reference.contains(char::is_whitespace) {
        Err(BuildError::ConfigError(format!(
            "invalid task name '{reference}'"
        )))
    } else {
        Ok(project.child(reference))
    }
}
