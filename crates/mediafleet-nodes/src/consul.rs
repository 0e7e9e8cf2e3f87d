//! Service-registry client over the agent HTTP API.
//!
//! Media hosts register as services carrying a shared tag. A node is down only
//! when its aggregated health is critical; a missing service is reported as
//! not found. Watches long-poll the catalog health endpoint and count every
//! instance, passing or not, so an unhealthy node is never mistaken for a
//! removed one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{NodeError, NodeResult};
use crate::model::NodeConfig;
use crate::registry::{NodeRegistry, ServiceWatch};

const INDEX_HEADER: &str = "X-Consul-Index";
const META_SCHEME: &str = "scheme";
const HEALTH_PATH: &str = "/api/v1/health";
/// Extra time allowed on top of the long-poll wait before the request times out.
const WATCH_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthStatus {
    Passing,
    Warning,
    Critical,
}

#[derive(Debug, Deserialize)]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port", default)]
    port: u16,
    #[serde(rename = "Meta", default)]
    meta: HashMap<String, String>,
}

impl AgentService {
    fn into_node(self, health: HealthStatus) -> NodeConfig {
        NodeConfig {
            scheme: self
                .meta
                .get(META_SCHEME)
                .cloned()
                .unwrap_or_else(|| "http".to_string()),
            id: self.id,
            name: self.service,
            host: self.address,
            port: self.port,
            is_up: health != HealthStatus::Critical,
        }
    }
}

/// The manager's own registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRegistration {
    /// Service id (see [`crate::manager_node_id`]).
    #[serde(rename = "ID")]
    pub id: String,
    /// Service name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Advertised address.
    #[serde(rename = "Address")]
    pub address: String,
    /// Advertised port.
    #[serde(rename = "Port")]
    pub port: u16,
    /// Service tags.
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    /// Service metadata (scheme, host, port).
    #[serde(rename = "Meta")]
    pub meta: HashMap<String, String>,
    /// HTTP health check polled by the agent.
    #[serde(rename = "Check")]
    pub check: HealthCheck,
}

/// HTTP health check definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    /// URL the agent polls.
    #[serde(rename = "HTTP")]
    pub http: String,
    /// Poll interval, e.g. `10s`.
    #[serde(rename = "Interval")]
    pub interval: String,
    /// Poll timeout, e.g. `30s`.
    #[serde(rename = "Timeout")]
    pub timeout: String,
}

impl ServiceRegistration {
    /// Registration for a manager reachable at `scheme://address:port`.
    #[must_use]
    pub fn manager(
        id: String,
        name: String,
        scheme: &str,
        address: String,
        port: u16,
        tag: String,
    ) -> Self {
        let meta = HashMap::from([
            (META_SCHEME.to_string(), scheme.to_string()),
            ("host".to_string(), address.clone()),
            ("port".to_string(), port.to_string()),
        ]);
        Self {
            check: HealthCheck {
                http: format!("{scheme}://{address}:{port}{HEALTH_PATH}"),
                interval: "10s".to_string(),
                timeout: "30s".to_string(),
            },
            id,
            name,
            address,
            port,
            tags: vec![tag],
            meta,
        }
    }
}

/// Registry client backed by the agent HTTP API.
#[derive(Clone)]
pub struct ConsulRegistry {
    client: Client,
    base_url: String,
    media_host_tag: String,
    request_timeout: Duration,
    watch_wait: Duration,
}

impl ConsulRegistry {
    /// Build a client for the agent at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        media_host_tag: impl Into<String>,
        request_timeout: Duration,
        watch_wait: Duration,
    ) -> NodeResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .build()
            .map_err(|err| NodeError::http("consul.client_build", base_url.clone(), err))?;
        Ok(Self {
            client,
            base_url,
            media_host_tag: media_host_tag.into(),
            request_timeout,
            watch_wait,
        })
    }

    /// Register the manager's own service.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent rejects the registration.
    pub async fn register_self(&self, registration: &ServiceRegistration) -> NodeResult<()> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        let response = self
            .client
            .put(&url)
            .timeout(self.request_timeout)
            .json(registration)
            .send()
            .await
            .map_err(|err| NodeError::http("consul.register", url.clone(), err))?;
        ensure_success("consul.register", &url, &response)?;
        info!(service_id = %registration.id, "registered manager with service registry");
        Ok(())
    }

    /// Remove a service registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent rejects the request.
    pub async fn deregister(&self, service_id: &str) -> NodeResult<()> {
        let url = format!("{}/v1/agent/service/deregister/{service_id}", self.base_url);
        let response = self
            .client
            .put(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| NodeError::http("consul.deregister", url.clone(), err))?;
        ensure_success("consul.deregister", &url, &response)?;
        info!(service_id = %service_id, "deregistered from service registry");
        Ok(())
    }

    async fn health(&self, service_id: &str) -> NodeResult<HealthStatus> {
        let url = format!(
            "{}/v1/agent/health/service/id/{service_id}?format=text",
            self.base_url
        );
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| NodeError::http("consul.health", url.clone(), err))?;
        match response.status() {
            StatusCode::OK => Ok(HealthStatus::Passing),
            StatusCode::TOO_MANY_REQUESTS => Ok(HealthStatus::Warning),
            StatusCode::SERVICE_UNAVAILABLE => Ok(HealthStatus::Critical),
            StatusCode::NOT_FOUND => Err(NodeError::NotFound {
                node_id: service_id.to_string(),
            }),
            other => Err(NodeError::status("consul.health", url, other.as_u16())),
        }
    }
}

#[async_trait]
impl NodeRegistry for ConsulRegistry {
    async fn list_nodes(&self) -> NodeResult<Vec<NodeConfig>> {
        let url = format!("{}/v1/agent/services", self.base_url);
        let filter = format!("Tags contains \"{}\"", self.media_host_tag);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .query(&[("filter", filter.as_str())])
            .send()
            .await
            .map_err(|err| NodeError::http("consul.list_services", url.clone(), err))?;
        ensure_success("consul.list_services", &url, &response)?;
        let services: HashMap<String, AgentService> = response
            .json()
            .await
            .map_err(|err| NodeError::decode("consul.list_services", url.clone(), err))?;

        let mut services: Vec<AgentService> = services.into_values().collect();
        services.sort_by(|left, right| left.id.cmp(&right.id));

        let mut nodes = Vec::with_capacity(services.len());
        for service in services {
            let health = self.health(&service.id).await?;
            nodes.push(service.into_node(health));
        }
        debug!(nodes = nodes.len(), "listed media hosts");
        Ok(nodes)
    }

    async fn get_node(&self, node_id: &str) -> NodeResult<NodeConfig> {
        let url = format!("{}/v1/agent/service/{node_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| NodeError::http("consul.get_service", url.clone(), err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(NodeError::NotFound {
                node_id: node_id.to_string(),
            });
        }
        ensure_success("consul.get_service", &url, &response)?;
        let service: AgentService = response
            .json()
            .await
            .map_err(|err| NodeError::decode("consul.get_service", url.clone(), err))?;
        let health = self.health(&service.id).await?;
        Ok(service.into_node(health))
    }

    async fn watch_service(&self, service_name: &str, index: u64) -> NodeResult<ServiceWatch> {
        let url = format!("{}/v1/health/service/{service_name}", self.base_url);
        let wait = format!("{}s", self.watch_wait.as_secs());
        let response = self
            .client
            .get(&url)
            .timeout(self.watch_wait + WATCH_SLACK)
            .query(&[("index", index.to_string()), ("wait", wait)])
            .send()
            .await
            .map_err(|err| NodeError::http("consul.watch_service", url.clone(), err))?;
        ensure_success("consul.watch_service", &url, &response)?;
        let next_index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(index);
        let instances: Vec<Value> = response
            .json()
            .await
            .map_err(|err| NodeError::decode("consul.watch_service", url.clone(), err))?;
        Ok(ServiceWatch {
            index: next_index,
            instances: instances.len(),
        })
    }
}

fn ensure_success(operation: &'static str, url: &str, response: &Response) -> NodeResult<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(NodeError::status(operation, url.to_string(), status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;
    use serde_json::json;

    const TAG: &str = "mediafleet-media-host";

    fn registry(server: &MockServer) -> NodeResult<ConsulRegistry> {
        ConsulRegistry::new(
            server.base_url(),
            TAG,
            Duration::from_secs(2),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn list_nodes_maps_services_and_health() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/agent/services")
                    .query_param("filter", "Tags contains \"mediafleet-media-host\"");
                then.status(200).json_body(json!({
                    "b-node": {"ID": "b-node", "Service": "host-b", "Address": "10.0.0.2", "Port": 9001, "Meta": {"scheme": "https"}},
                    "a-node": {"ID": "a-node", "Service": "host-a", "Address": "10.0.0.1", "Port": 9000, "Meta": {}}
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/agent/health/service/id/a-node");
                then.status(429).body("warning");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/agent/health/service/id/b-node");
                then.status(503).body("critical");
            })
            .await;

        let nodes = registry(&server)?.list_nodes().await?;

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "a-node");
        assert_eq!(nodes[0].scheme, "http");
        assert!(nodes[0].is_up, "warning health still counts as up");
        assert_eq!(nodes[1].base_url(), "https://10.0.0.2:9001");
        assert!(!nodes[1].is_up);
        Ok(())
    }

    #[tokio::test]
    async fn get_node_maps_missing_service_to_not_found() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/agent/service/ghost");
                then.status(404);
            })
            .await;

        let err = registry(&server)?.get_node("ghost").await.err();
        assert!(matches!(err, Some(NodeError::NotFound { node_id }) if node_id == "ghost"));
        Ok(())
    }

    #[tokio::test]
    async fn watch_counts_instances_and_advances_index() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/health/service/host-a")
                    .query_param("index", "7")
                    .query_param("wait", "1s");
                then.status(200)
                    .header(INDEX_HEADER, "12")
                    .json_body(json!([{"Service": {"ID": "a-node"}}]));
            })
            .await;

        let watch = registry(&server)?.watch_service("host-a", 7).await?;
        mock.assert_async().await;
        assert_eq!(
            watch,
            ServiceWatch {
                index: 12,
                instances: 1
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn register_self_sends_health_check() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v1/agent/service/register")
                    .json_body(json!({
                        "ID": "abc123",
                        "Name": "manager",
                        "Address": "10.0.0.9",
                        "Port": 9797,
                        "Tags": ["mediafleet-manager"],
                        "Meta": {"scheme": "http", "host": "10.0.0.9", "port": "9797"},
                        "Check": {
                            "HTTP": "http://10.0.0.9:9797/api/v1/health",
                            "Interval": "10s",
                            "Timeout": "30s"
                        }
                    }));
                then.status(200);
            })
            .await;

        let registration = ServiceRegistration::manager(
            "abc123".into(),
            "manager".into(),
            "http",
            "10.0.0.9".into(),
            9797,
            "mediafleet-manager".into(),
        );
        registry(&server)?.register_self(&registration).await?;
        mock.assert_async().await;
        Ok(())
    }
}
