//! Per-node content access.

use std::time::Duration;

use async_trait::async_trait;
use mediafleet_catalog::MediaItem;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{NodeError, NodeResult};
use crate::model::NodeConfig;

/// Content operations offered by every media host.
#[async_trait]
pub trait NodeContentClient: Send + Sync {
    /// The node's full media listing, attributed to the node.
    async fn list_media(&self, node: &NodeConfig) -> NodeResult<Vec<MediaItem>>;

    /// Archive containing the listed media.
    async fn download_media(&self, node: &NodeConfig, media_ids: &[String]) -> NodeResult<Vec<u8>>;

    /// Archive the node staged for a transfer.
    async fn download_transfer(&self, node: &NodeConfig, transfer_id: Uuid) -> NodeResult<Vec<u8>>;

    /// Raw content of one media item.
    async fn stream_media(&self, node: &NodeConfig, media_id: &str) -> NodeResult<Vec<u8>>;

    /// Cover art of one media item.
    async fn media_art(&self, node: &NodeConfig, media_id: &str) -> NodeResult<Vec<u8>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequest<'a> {
    media_ids: &'a [String],
}

/// HTTP implementation of [`NodeContentClient`].
#[derive(Clone)]
pub struct HttpContentClient {
    client: Client,
}

impl HttpContentClient {
    /// Build a client applying `timeout` to every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> NodeResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| NodeError::http("node_client.build", String::new(), err))?;
        Ok(Self { client })
    }

    async fn fetch_bytes(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
        url: String,
    ) -> NodeResult<Vec<u8>> {
        let response = request
            .send()
            .await
            .map_err(|err| NodeError::http(operation, url.clone(), err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::status(operation, url, status.as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| NodeError::http(operation, url.clone(), err))?;
        debug!(operation, url = %url, bytes = bytes.len(), "fetched node content");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl NodeContentClient for HttpContentClient {
    async fn list_media(&self, node: &NodeConfig) -> NodeResult<Vec<MediaItem>> {
        let url = format!("{}/api/v1/media", node.base_url());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| NodeError::http("node_client.list_media", url.clone(), err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::status(
                "node_client.list_media",
                url,
                status.as_u16(),
            ));
        }
        let mut items: Vec<MediaItem> = response
            .json()
            .await
            .map_err(|err| NodeError::decode("node_client.list_media", url.clone(), err))?;
        for item in &mut items {
            node.id.clone_into(&mut item.node_id);
        }
        Ok(items)
    }

    async fn download_media(&self, node: &NodeConfig, media_ids: &[String]) -> NodeResult<Vec<u8>> {
        let url = format!("{}/api/v1/media/download", node.base_url());
        let request = self.client.post(&url).json(&DownloadRequest { media_ids });
        self.fetch_bytes("node_client.download_media", request, url)
            .await
    }

    async fn download_transfer(&self, node: &NodeConfig, transfer_id: Uuid) -> NodeResult<Vec<u8>> {
        let url = format!("{}/api/v1/transfers/{transfer_id}/download", node.base_url());
        let request = self.client.get(&url);
        self.fetch_bytes("node_client.download_transfer", request, url)
            .await
    }

    async fn stream_media(&self, node: &NodeConfig, media_id: &str) -> NodeResult<Vec<u8>> {
        let url = format!("{}/api/v1/media/{media_id}/stream", node.base_url());
        let request = self.client.get(&url);
        self.fetch_bytes("node_client.stream_media", request, url)
            .await
    }

    async fn media_art(&self, node: &NodeConfig, media_id: &str) -> NodeResult<Vec<u8>> {
        let url = format!("{}/api/v1/media/{media_id}/art", node.base_url());
        let request = self.client.get(&url);
        self.fetch_bytes("node_client.media_art", request, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;
    use serde_json::json;

    fn node_for(server: &MockServer) -> NodeConfig {
        NodeConfig {
            id: "n1".into(),
            name: "host-one".into(),
            host: server.host(),
            port: server.port(),
            scheme: "http".into(),
            is_up: true,
        }
    }

    fn client() -> NodeResult<HttpContentClient> {
        HttpContentClient::new(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn list_media_attributes_items_to_the_node() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/media");
                then.status(200).json_body(json!([
                    {"id": "m1", "nodeId": "stale", "name": "Intro", "extension": "mp3", "metadata": {"album": "A"}},
                    {"id": "m2", "name": "Outro", "extension": "flac"}
                ]));
            })
            .await;

        let items = client()?.list_media(&node_for(&server)).await?;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.node_id == "n1"));
        assert_eq!(items[0].metadata_str("album"), Some("A"));
        Ok(())
    }

    #[tokio::test]
    async fn download_media_posts_ids_and_returns_bytes() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/media/download")
                    .json_body(json!({"mediaIds": ["m1", "m2"]}));
                then.status(200).body(b"PK\x05\x06archive");
            })
            .await;

        let bytes = client()?
            .download_media(&node_for(&server), &["m1".to_string(), "m2".to_string()])
            .await?;
        mock.assert_async().await;
        assert_eq!(bytes, b"PK\x05\x06archive");
        Ok(())
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_operation() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let transfer_id = Uuid::from_u128(7);
        server
            .mock_async(move |when, then| {
                when.method(GET)
                    .path(format!("/api/v1/transfers/{transfer_id}/download"));
                then.status(409);
            })
            .await;

        let err = client()?
            .download_transfer(&node_for(&server), transfer_id)
            .await
            .err();
        assert!(matches!(
            err,
            Some(NodeError::HttpStatus {
                operation: "node_client.download_transfer",
                status: 409,
                ..
            })
        ));
        Ok(())
    }
}
