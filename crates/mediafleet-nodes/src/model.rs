//! Fleet member descriptor.

use serde::{Deserialize, Serialize};

/// One media host and its last-known reachability.
///
/// Built from registry data on every query and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Registry service id.
    pub id: String,
    /// Registry service name.
    pub name: String,
    /// Host or address the node serves on.
    pub host: String,
    /// Port the node serves on.
    pub port: u16,
    /// `http` or `https`.
    pub scheme: String,
    /// False only when the registry reports the node's health as critical.
    pub is_up: bool,
}

impl NodeConfig {
    /// Base URL of the node's API.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.scheme.is_empty() {
            "http"
        } else {
            &self.scheme
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_scheme() {
        let mut node = NodeConfig {
            id: "n1".into(),
            name: "host-one".into(),
            host: "10.0.0.4".into(),
            port: 9000,
            scheme: String::new(),
            is_up: true,
        };
        assert_eq!(node.base_url(), "http://10.0.0.4:9000");
        node.scheme = "https".into();
        assert_eq!(node.base_url(), "https://10.0.0.4:9000");
    }
}
