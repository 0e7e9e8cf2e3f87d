//! In-memory stand-ins for the registry and the per-node content client.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mediafleet_catalog::MediaItem;
use mediafleet_nodes::{
    NodeConfig, NodeContentClient, NodeError, NodeRegistry, NodeResult, ServiceWatch,
};
use tokio::sync::Notify;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry backed by a map of nodes.
///
/// `watch_service` parks until the node set changes or `wait` elapses, like a
/// registry long poll.
pub struct FakeRegistry {
    nodes: Mutex<BTreeMap<String, NodeConfig>>,
    version: Mutex<u64>,
    changed: Notify,
    wait: Duration,
}

impl Default for FakeRegistry {
    fn default() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            version: Mutex::new(1),
            changed: Notify::new(),
            wait: Duration::from_millis(50),
        }
    }
}

impl FakeRegistry {
    /// Registry pre-populated with `nodes`.
    #[must_use]
    pub fn with_nodes(nodes: impl IntoIterator<Item = NodeConfig>) -> Self {
        let registry = Self::default();
        for node in nodes {
            registry.insert(node);
        }
        registry
    }

    /// Add or replace a node.
    pub fn insert(&self, node: NodeConfig) {
        lock(&self.nodes).insert(node.id.clone(), node);
        self.bump();
    }

    /// Deregister a node entirely.
    pub fn remove(&self, node_id: &str) {
        lock(&self.nodes).remove(node_id);
        self.bump();
    }

    /// Flip a node's health without deregistering it.
    pub fn set_up(&self, node_id: &str, is_up: bool) {
        if let Some(node) = lock(&self.nodes).get_mut(node_id) {
            node.is_up = is_up;
        }
        self.bump();
    }

    fn bump(&self) {
        *lock(&self.version) += 1;
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl NodeRegistry for FakeRegistry {
    async fn list_nodes(&self) -> NodeResult<Vec<NodeConfig>> {
        Ok(lock(&self.nodes).values().cloned().collect())
    }

    async fn get_node(&self, node_id: &str) -> NodeResult<NodeConfig> {
        lock(&self.nodes)
            .get(node_id)
            .cloned()
            .ok_or_else(|| NodeError::NotFound {
                node_id: node_id.to_string(),
            })
    }

    async fn watch_service(&self, service_name: &str, index: u64) -> NodeResult<ServiceWatch> {
        let current = *lock(&self.version);
        if current <= index {
            let _ = tokio::time::timeout(self.wait, self.changed.notified()).await;
        }
        let index = *lock(&self.version);
        let instances = lock(&self.nodes)
            .values()
            .filter(|node| node.name == service_name)
            .count();
        Ok(ServiceWatch { index, instances })
    }
}

#[derive(Default)]
struct NodeScript {
    listing: Option<Vec<MediaItem>>,
    archive: Option<Vec<u8>>,
    failure: Option<String>,
    delay: Option<Duration>,
}

/// Content client answering from per-node scripts.
///
/// Unscripted nodes are unreachable. Calls are recorded so tests can assert
/// which nodes were contacted and which fetches ran to completion.
#[derive(Default)]
pub struct FakeContentClient {
    scripts: Mutex<HashMap<String, NodeScript>>,
    download_calls: Mutex<Vec<(String, Vec<String>)>>,
    completed: Mutex<Vec<String>>,
}

impl FakeContentClient {
    /// Answer `list_media` for the node with `items`.
    pub fn with_listing(&self, node_id: &str, items: Vec<MediaItem>) -> &Self {
        lock(&self.scripts)
            .entry(node_id.to_string())
            .or_default()
            .listing = Some(items);
        self
    }

    /// Answer media and transfer downloads for the node with `archive`.
    pub fn with_archive(&self, node_id: &str, archive: Vec<u8>) -> &Self {
        lock(&self.scripts)
            .entry(node_id.to_string())
            .or_default()
            .archive = Some(archive);
        self
    }

    /// Fail every listing and download from the node with `reason`.
    pub fn fail(&self, node_id: &str, reason: &str) -> &Self {
        lock(&self.scripts)
            .entry(node_id.to_string())
            .or_default()
            .failure = Some(reason.to_string());
        self
    }

    /// Delay every download from the node by `delay`.
    pub fn with_delay(&self, node_id: &str, delay: Duration) -> &Self {
        lock(&self.scripts)
            .entry(node_id.to_string())
            .or_default()
            .delay = Some(delay);
        self
    }

    /// Every `(node_id, media_ids)` download requested so far.
    #[must_use]
    pub fn download_calls(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.download_calls).clone()
    }

    /// Node ids whose download ran to completion.
    #[must_use]
    pub fn completed_downloads(&self) -> Vec<String> {
        lock(&self.completed).clone()
    }

    async fn archive_for(&self, node: &NodeConfig) -> NodeResult<Vec<u8>> {
        let (delay, outcome) = {
            let scripts = lock(&self.scripts);
            let script = scripts.get(&node.id);
            let delay = script.and_then(|script| script.delay);
            let outcome = match script {
                Some(NodeScript {
                    failure: Some(reason),
                    ..
                }) => Err(unreachable(node, reason)),
                Some(NodeScript {
                    archive: Some(archive),
                    ..
                }) => Ok(archive.clone()),
                _ => Err(unreachable(node, "no archive scripted")),
            };
            (delay, outcome)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if outcome.is_ok() {
            lock(&self.completed).push(node.id.clone());
        }
        outcome
    }
}

fn unreachable(node: &NodeConfig, reason: &str) -> NodeError {
    NodeError::Unreachable {
        node_id: node.id.clone(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl NodeContentClient for FakeContentClient {
    async fn list_media(&self, node: &NodeConfig) -> NodeResult<Vec<MediaItem>> {
        let listing = match lock(&self.scripts).get(&node.id) {
            Some(NodeScript {
                failure: Some(reason),
                ..
            }) => return Err(unreachable(node, reason)),
            Some(script) => script.listing.clone(),
            None => None,
        };
        let mut items = listing.ok_or_else(|| unreachable(node, "no listing scripted"))?;
        for item in &mut items {
            item.node_id.clone_from(&node.id);
        }
        Ok(items)
    }

    async fn download_media(&self, node: &NodeConfig, media_ids: &[String]) -> NodeResult<Vec<u8>> {
        lock(&self.download_calls).push((node.id.clone(), media_ids.to_vec()));
        self.archive_for(node).await
    }

    async fn download_transfer(&self, node: &NodeConfig, _transfer_id: Uuid) -> NodeResult<Vec<u8>> {
        lock(&self.download_calls).push((node.id.clone(), Vec::new()));
        self.archive_for(node).await
    }

    async fn stream_media(&self, node: &NodeConfig, _media_id: &str) -> NodeResult<Vec<u8>> {
        self.archive_for(node).await
    }

    async fn media_art(&self, node: &NodeConfig, _media_id: &str) -> NodeResult<Vec<u8>> {
        self.archive_for(node).await
    }
}
