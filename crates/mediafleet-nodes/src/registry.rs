//! Registry seam.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::NodeResult;
use crate::model::NodeConfig;

/// Result of one health long-poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceWatch {
    /// Index to pass to the next poll.
    pub index: u64,
    /// Registered instances of the service, healthy or not.
    pub instances: usize,
}

/// Fleet membership and health lookups.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Every registered media host with its current health.
    async fn list_nodes(&self) -> NodeResult<Vec<NodeConfig>>;

    /// A single media host. Unknown ids yield [`crate::NodeError::NotFound`].
    async fn get_node(&self, node_id: &str) -> NodeResult<NodeConfig>;

    /// Block until the instance set of `service_name` changes past `index`
    /// or the registry's wait elapses.
    async fn watch_service(&self, service_name: &str, index: u64) -> NodeResult<ServiceWatch>;
}

/// Stable registry id for a manager named `name`: the last 12 hex characters
/// of `sha256("mediafleet-manager-<name>")`.
#[must_use]
pub fn manager_node_id(name: &str) -> String {
    let digest = Sha256::digest(format!("mediafleet-manager-{name}").as_bytes());
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex[hex.len() - 12..].to_string()
}
