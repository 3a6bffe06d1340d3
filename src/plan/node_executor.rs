// src/plan/node_executor.rs

//! Pluggable node execution backend.
//!
//! The plan executor hands every ready node to a [`NodeExecutor`]. Production
//! code uses [`CommandNodeExecutor`]; tests can provide their own
//! implementation that records nodes instead of spawning processes.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::plan::node::{NodeWork, ScheduledNode};

/// Runs the work of a single node.
pub trait NodeExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        node: &'a ScheduledNode,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// Runs task commands through the platform shell.
///
/// Tasks without a command and transform steps succeed immediately.
#[derive(Debug, Default, Clone)]
pub struct CommandNodeExecutor;

impl CommandNodeExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl NodeExecutor for CommandNodeExecutor {
    fn execute<'a>(
        &'a self,
        node: &'a ScheduledNode,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match &node.work {
                NodeWork::Task {
                    cmd: Some(cmd), ..
                } => run_command(node, cmd).await,
                NodeWork::Task { cmd: None, .. } => {
                    debug!(node = %node.identity, "task has no command; nothing to do");
                    Ok(())
                }
                NodeWork::TransformStep { name } => {
                    debug!(node = %node.identity, step = %name, "transform step");
                    Ok(())
                }
                NodeWork::External(_) => Ok(()),
            }
        })
    }
}

async fn run_command(node: &ScheduledNode, cmd: &str) -> anyhow::Result<()> {
    info!(node = %node.identity, cmd = %cmd, "starting task process");

    // Build a shell command appropriate for the platform.
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for {}", node.identity))?;

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let identity = node.identity.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(node = %identity, "stderr: {}", line);
            }
        });
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of {}", node.identity))?;

    let code = status.code().unwrap_or(-1);
    info!(
        node = %node.identity,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );
    if !status.success() {
        bail!("command '{cmd}' exited with code {code}");
    }
    Ok(())
}
