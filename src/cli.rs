// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::plan::DetailLevel;

/// Command-line arguments for `buildtree`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "buildtree",
    version,
    about = "Configure, schedule and run a tree of builds with cross-build task dependencies.",
    long_about = None
)]
pub struct CliArgs {
    /// Tasks to run. A bare name selects that task in every project of the
    /// root build, a `:path` selects one task.
    ///
    /// Default: the root build's `requested_tasks`.
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,

    /// Path to the build tree definition (TOML).
    ///
    /// Default: `BuildTree.toml` in the current working directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Schedule and print the planned nodes, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BUILDTREE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Keep running independent tasks after a task fails.
    #[arg(long = "continue")]
    pub continue_on_failure: bool,

    /// Maximum number of nodes executed at once per build.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub max_workers: Option<u16>,

    /// Exclude a task (same selector syntax as TASK). May be repeated.
    #[arg(long = "exclude-task", short = 'x', value_name = "TASK")]
    pub exclude_tasks: Vec<String>,

    /// Detail level of the dry-run output.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub detail_level: Option<DetailLevelArg>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum DetailLevelArg {
    Tasks,
    TransformSteps,
}

impl From<DetailLevelArg> for DetailLevel {
    fn from(arg: DetailLevelArg) -> Self {
        match arg {
            DetailLevelArg::Tasks => DetailLevel::Level1Tasks,
            DetailLevelArg::TransformSteps => DetailLevel::Level2TransformSteps,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
