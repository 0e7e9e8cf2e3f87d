//! Connectivity watcher.
//!
//! One long-poll task per node id. A node is reported removed only when the
//! registry lists no instance of its service at all; an unhealthy instance is
//! still an instance. A removed node drops out of the watch set before its
//! removal event is sent, so whoever observes the node's next ready signal can
//! watch it again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mediafleet_telemetry::Metrics;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::NodeRegistry;

/// Emitted once when a watched node disappears from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRemoved {
    /// Registry id of the removed node.
    pub node_id: String,
    /// Service name that was watched.
    pub node_name: String,
}

/// Keeps one registry watch per known node.
#[derive(Clone)]
pub struct ConnectivityWatcher {
    inner: Arc<WatcherInner>,
}

struct WatcherInner {
    registry: Arc<dyn NodeRegistry>,
    watching: Mutex<HashMap<String, JoinHandle<()>>>,
    removals: mpsc::UnboundedSender<NodeRemoved>,
    retry_delay: Duration,
    metrics: Metrics,
}

impl ConnectivityWatcher {
    /// Create a watcher and the receiving end of its removal events.
    ///
    /// `retry_delay` is slept after a failed poll before polling again.
    #[must_use]
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        metrics: Metrics,
        retry_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<NodeRemoved>) {
        let (removals, receiver) = mpsc::unbounded_channel();
        let watcher = Self {
            inner: Arc::new(WatcherInner {
                registry,
                watching: Mutex::new(HashMap::new()),
                removals,
                retry_delay,
                metrics,
            }),
        };
        (watcher, receiver)
    }

    /// Start watching a node. Returns `false` if it is already watched.
    pub async fn watch(&self, node_id: &str, node_name: &str) -> bool {
        let mut watching = self.inner.watching.lock().await;
        if watching.contains_key(node_id) {
            debug!(node_id = %node_id, "node already watched");
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let node = NodeRemoved {
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
        };
        let handle = tokio::spawn(async move { inner.run(node).await });
        watching.insert(node_id.to_string(), handle);
        self.inner.metrics.set_watched_nodes(watching.len());
        drop(watching);
        info!(node_id = %node_id, node_name = %node_name, "watching node connectivity");
        true
    }

    /// Whether a watch is active for the node.
    pub async fn is_watching(&self, node_id: &str) -> bool {
        self.inner.watching.lock().await.contains_key(node_id)
    }

    /// Ids of every watched node, sorted.
    pub async fn watched(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.watching.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Abort every watch.
    pub async fn shutdown(&self) {
        let mut watching = self.inner.watching.lock().await;
        for (_, handle) in watching.drain() {
            handle.abort();
        }
        self.inner.metrics.set_watched_nodes(0);
    }
}

impl WatcherInner {
    async fn run(&self, node: NodeRemoved) {
        let mut index = 0;
        loop {
            match self.registry.watch_service(&node.node_name, index).await {
                Ok(watch) if watch.instances == 0 => break,
                Ok(watch) => {
                    // A lower index means the registry state was reset.
                    index = if watch.index < index { 0 } else { watch.index };
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        node_id = %node.node_id,
                        "connectivity poll failed; retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }

        {
            let mut watching = self.watching.lock().await;
            watching.remove(&node.node_id);
            self.metrics.set_watched_nodes(watching.len());
        }
        info!(node_id = %node.node_id, "node removed from registry");
        if self.removals.send(node).is_err() {
            debug!("no subscriber for node removal events");
        }
    }
}
