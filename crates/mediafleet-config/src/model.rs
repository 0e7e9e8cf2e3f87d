//! Typed configuration sections and their defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port the manager advertises to the registry.
pub const DEFAULT_PORT: u16 = 9797;
/// Default service registry port.
pub const DEFAULT_REGISTRY_PORT: u16 = 8500;
/// Registry tag carried by every media host service.
pub const DEFAULT_MEDIA_HOST_TAG: &str = "mediafleet-media-host";
/// Registry tag carried by the manager's own service.
pub const DEFAULT_MANAGER_TAG: &str = "mediafleet-manager";

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Service name the manager registers under.
    pub name: String,
    /// Address the manager advertises to the registry.
    pub address: String,
    /// Port the manager advertises.
    pub port: u16,
    /// Scheme the manager advertises (`http` or `https`).
    pub scheme: String,
    /// Service registry connection.
    pub registry: RegistryConfig,
    /// Message bus publishing behaviour.
    pub bus: BusConfig,
    /// Local directories.
    pub storage: StorageConfig,
    /// Transfer saga settings.
    pub transfer: TransferConfig,
    /// Per-node content client settings.
    pub node_client: NodeClientConfig,
    /// Logging output.
    pub logging: LoggingSettings,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            scheme: "http".to_string(),
            registry: RegistryConfig::default(),
            bus: BusConfig::default(),
            storage: StorageConfig::default(),
            transfer: TransferConfig::default(),
            node_client: NodeClientConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Service registry connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Scheme used to reach the registry agent.
    pub scheme: String,
    /// Registry agent host.
    pub address: String,
    /// Registry agent port.
    pub port: u16,
    /// Tag identifying media host services.
    pub media_host_tag: String,
    /// Tag attached to the manager's own registration.
    pub manager_tag: String,
    /// Upper bound on a single health long-poll.
    pub watch_wait_secs: u64,
}

impl RegistryConfig {
    /// Base URL of the registry agent.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.address, self.port)
    }

    /// Long-poll wait as a duration.
    #[must_use]
    pub const fn watch_wait(&self) -> Duration {
        Duration::from_secs(self.watch_wait_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            address: "127.0.0.1".to_string(),
            port: DEFAULT_REGISTRY_PORT,
            media_host_tag: DEFAULT_MEDIA_HOST_TAG.to_string(),
            manager_tag: DEFAULT_MANAGER_TAG.to_string(),
            watch_wait_secs: 300,
        }
    }
}

/// Message bus publishing behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Total publish attempts while the channel is not open.
    pub publish_attempts: u32,
    /// Delay between publish attempts, in milliseconds.
    pub publish_backoff_ms: u64,
    /// In-process bus buffer size.
    pub capacity: usize,
}

impl BusConfig {
    /// Delay between publish attempts.
    #[must_use]
    pub const fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            publish_attempts: 5,
            publish_backoff_ms: 1_000,
            capacity: 1_024,
        }
    }
}

/// Local directories used by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Where transfer archives targeting the manager are written.
    pub download_dir: PathBuf,
    /// Where saga records are persisted.
    pub record_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_base_dir();
        Self {
            download_dir: base.join("downloads"),
            record_dir: base.join("records"),
        }
    }
}

/// Transfer saga settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    /// Lifetime of a transfer and its archive, in hours.
    pub expiry_hours: u32,
    /// Interval between expiry sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl TransferConfig {
    /// Interval between expiry sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            expiry_hours: 24,
            sweep_interval_secs: 300,
        }
    }
}

/// Per-node content client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeClientConfig {
    /// Request timeout, in seconds.
    pub timeout_secs: u64,
}

impl NodeClientConfig {
    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Level directive passed to the env filter.
    pub level: String,
    /// `json` or `pretty`; inferred from the build profile when absent.
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(".mediafleet")
        .join("manager")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ManagerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bus.publish_attempts, 5);
        assert_eq!(config.bus.publish_backoff(), Duration::from_secs(1));
        assert_eq!(config.transfer.expiry_hours, 24);
        assert_eq!(config.node_client.timeout(), Duration::from_secs(10));
        assert!(config.storage.download_dir.ends_with(".mediafleet/manager/downloads"));
        assert_eq!(config.registry.base_url(), "http://127.0.0.1:8500");
    }
}
