use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::bail;
use buildtree::plan::{NodeExecutor, ScheduledNode};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// A node executor that:
/// - records which nodes were "run", by their display identity (`:a:build`,
///   `:lib:jar`, `unzip#0 for :app`)
/// - fails the nodes registered with [`fail`](Self::fail)
/// - holds the nodes registered with [`block`](Self::block) until their gate
///   is released
#[derive(Default)]
pub struct RecordingNodeExecutor {
    executed: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl RecordingNodeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, node: &str) {
        self.failing.lock().insert(node.to_string());
    }

    pub fn panic_on(&self, node: &str) {
        self.panicking.lock().insert(node.to_string());
    }

    /// Hold `node` until the returned gate is notified.
    pub fn block(&self, node: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(node.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn position(&self, node: &str) -> Option<usize> {
        self.executed.lock().iter().position(|n| n == node)
    }
}

impl NodeExecutor for RecordingNodeExecutor {
    fn execute<'a>(
        &'a self,
        node: &'a ScheduledNode,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let name = node.identity.to_string();
            let gate = self.gates.lock().get(&name).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }

            self.executed.lock().push(name.clone());

            if self.panicking.lock().contains(&name) {
                panic!("node {name} panicked");
            }
            if self.failing.lock().contains(&name) {
                bail!("node {name} failed");
            }
            Ok(())
        })
    }
}
