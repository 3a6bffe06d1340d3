// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod operations;
pub mod plan;
pub mod result;
pub mod state;
pub mod tree;
pub mod workgraph;

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_and_validate};
use crate::config::model::BuildTreeConfig;
use crate::plan::{CommandNodeExecutor, DetailLevel};
use crate::result::ExecutionResult;
use crate::tree::{BuildTree, PlannedBuild};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - loading and validating the tree definition
/// - command-line overrides
/// - the build tree with a process-spawning node executor
/// - scheduling, execution and finishing every build
pub fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut cfg = load_and_validate(&config_path)?;
    apply_overrides(&mut cfg, &args);
    let level = cfg.options.detail_level;
    info!(config = %config_path.display(), workers = cfg.options.max_workers, "build tree loaded");

    let tree = BuildTree::from_config(cfg, Arc::new(CommandNodeExecutor::new()))?;

    if args.dry_run {
        let outcome = match tree.planned_graph(&args.tasks, level) {
            Ok(planned) => {
                print_dry_run(&planned, level);
                ExecutionResult::success()
            }
            Err(err) => ExecutionResult::failed(err),
        };
        tree.finish(outcome).rethrow()?;
        return Ok(());
    }

    let result = tree.schedule_and_run(&args.tasks);
    tree.finish(result).rethrow()?;
    info!("BUILD SUCCESSFUL");
    Ok(())
}

fn apply_overrides(cfg: &mut BuildTreeConfig, args: &CliArgs) {
    if let Some(workers) = args.max_workers {
        cfg.options.max_workers = usize::from(workers);
    }
    if args.continue_on_failure {
        cfg.options.continue_on_failure = true;
    }
    if let Some(level) = args.detail_level {
        cfg.options.detail_level = level.into();
    }
    cfg.root
        .excluded_tasks
        .extend(args.exclude_tasks.iter().cloned());
    debug!(options = ?cfg.options, "command-line overrides applied");
}

/// Print the planned nodes of every build.
fn print_dry_run(planned: &[PlannedBuild], level: DetailLevel) {
    println!("buildtree dry-run ({level})");
    for build in planned {
        println!();
        println!("{} ({} nodes):", build.build, build.nodes.len());
        for node in &build.nodes {
            println!("  - {}", node.node_identity);
            for dependency in &node.node_dependencies {
                println!("      after: {dependency}");
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
