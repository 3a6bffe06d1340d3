// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    BuildDefinition, BuildTreeConfig, RawBuildDefinition, RawBuildTreeConfig, TreeOptions,
};
use crate::errors::{BuildError, Result};
use crate::model::resolve_task_path;
use crate::tree::Path;

pub const DEFAULT_ROOT_NAME: &str = "root";

impl TryFrom<RawBuildTreeConfig> for BuildTreeConfig {
    type Error = BuildError;

    fn try_from(raw: RawBuildTreeConfig) -> std::result::Result<Self, Self::Error> {
        validate_tree_section(&raw)?;

        let root_name = raw
            .root
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_ROOT_NAME.to_string());
        let root = parse_build(root_name, raw.root)?;
        if root.projects.is_empty() {
            return Err(BuildError::ConfigError(
                "[root] must declare at least one project".to_string(),
            ));
        }

        let mut included = BTreeMap::new();
        for (key, build) in raw.included {
            if let Some(name) = &build.name {
                if name != &key {
                    return Err(BuildError::ConfigError(format!(
                        "included build '{key}' declares a different name '{name}'"
                    )));
                }
            }
            if key == root.name {
                return Err(BuildError::ConfigError(format!(
                    "included build '{key}' has the same name as the root build"
                )));
            }
            if key.is_empty() || key.contains(Path::SEPARATOR) {
                return Err(BuildError::ConfigError(format!(
                    "invalid included build name '{key}'"
                )));
            }
            let parsed = parse_build(key.clone(), build)?;
            included.insert(key, parsed);
        }

        let config = BuildTreeConfig {
            options: TreeOptions::from(raw.tree),
            root,
            included,
        };
        validate_references(&config)?;
        validate_dag(&config)?;
        Ok(config)
    }
}

fn validate_tree_section(raw: &RawBuildTreeConfig) -> Result<()> {
    if raw.tree.max_workers == 0 {
        return Err(BuildError::ConfigError(
            "[tree].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn parse_build(name: String, raw: RawBuildDefinition) -> Result<BuildDefinition> {
    let mut projects = BTreeMap::new();
    for (raw_path, project) in raw.projects {
        let path = Path::parse(&raw_path).map_err(|err| {
            BuildError::ConfigError(format!("build '{name}': invalid project path: {err}"))
        })?;
        projects.insert(path, project);
    }
    Ok(BuildDefinition {
        name,
        requested_tasks: raw.requested_tasks,
        excluded_tasks: raw.excluded_tasks,
        projects,
    })
}

/// Every task path of `build`.
fn task_paths(build: &BuildDefinition) -> BTreeSet<Path> {
    build
        .projects
        .iter()
        .flat_map(|(project, def)| def.tasks.keys().map(move |task| project.child(task)))
        .collect()
}

fn validate_references(cfg: &BuildTreeConfig) -> Result<()> {
    let included_tasks: BTreeMap<&str, BTreeSet<Path>> = cfg
        .included
        .iter()
        .map(|(name, build)| (name.as_str(), task_paths(build)))
        .collect();

    for build in std::iter::once(&cfg.root).chain(cfg.included.values()) {
        let own_tasks = task_paths(build);
        for (project, def) in &build.projects {
            for (name, task) in &def.tasks {
                let path = project.child(name);
                for dep in &task.after {
                    let dep_path = resolve_task_path(project, dep).map_err(|err| {
                        BuildError::ConfigError(format!(
                            "task '{path}' in build '{}': {err}",
                            build.name
                        ))
                    })?;
                    if dep_path == path {
                        return Err(BuildError::ConfigError(format!(
                            "task '{path}' in build '{}' cannot depend on itself in `after`",
                            build.name
                        )));
                    }
                    if !own_tasks.contains(&dep_path) {
                        return Err(BuildError::ConfigError(format!(
                            "task '{path}' in build '{}' has unknown dependency '{dep}' in `after`",
                            build.name
                        )));
                    }
                }
                for reference in &task.included {
                    let Some(tasks) = included_tasks.get(reference.build.as_str()) else {
                        return Err(BuildError::ConfigError(format!(
                            "task '{path}' in build '{}' references unknown included build '{}'",
                            build.name, reference.build
                        )));
                    };
                    if reference.build == build.name {
                        return Err(BuildError::ConfigError(format!(
                            "task '{path}' in build '{}' references its own build as included",
                            build.name
                        )));
                    }
                    let target = Path::parse(&reference.task)?;
                    if !tasks.contains(&target) {
                        return Err(BuildError::ConfigError(format!(
                            "task '{path}' in build '{}' references unknown task '{}' of build '{}'",
                            build.name, reference.task, reference.build
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Checks that the tree-wide task graph, including cross-build references,
/// has no cycles.
fn validate_dag(cfg: &BuildTreeConfig) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut labels: Vec<String> = Vec::new();
    let mut ids: BTreeMap<(String, Path), usize> = BTreeMap::new();
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

    let mut node = |build: &str, path: &Path, graph: &mut DiGraphMap<usize, ()>| -> usize {
        let key = (build.to_string(), path.clone());
        if let Some(id) = ids.get(&key) {
            return *id;
        }
        let id = labels.len();
        labels.push(format!("{build}{path}"));
        ids.insert(key, id);
        graph.add_node(id);
        id
    };

    for build in std::iter::once(&cfg.root).chain(cfg.included.values()) {
        for (project, def) in &build.projects {
            for (name, task) in &def.tasks {
                let task_id = node(&build.name, &project.child(name), &mut graph);
                for dep in &task.after {
                    let dep_path = resolve_task_path(project, dep)?;
                    let dep_id = node(&build.name, &dep_path, &mut graph);
                    graph.add_edge(dep_id, task_id, ());
                }
                for reference in &task.included {
                    let target = Path::parse(&reference.task)?;
                    let dep_id = node(&reference.build, &target, &mut graph);
                    graph.add_edge(dep_id, task_id, ());
                }
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let label = labels
                .get(cycle.node_id())
                .cloned()
                .unwrap_or_else(|| "<unknown>".to_string());
            Err(BuildError::DagCycle(format!(
                "cycle detected in task graph involving task '{label}'"
            )))
        }
    }
}
