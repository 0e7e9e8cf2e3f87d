//! Catalog reconciliation against the fleet.
//!
//! A full sync rebuilds the catalog from every reachable node; a node sync
//! refreshes one node's rows; a removal deletes one node's rows without
//! fetching anything.

use std::sync::Arc;

use mediafleet_catalog::{Catalog, MediaItem};
use mediafleet_nodes::{NodeConfig, NodeContentClient, NodeRegistry};
use mediafleet_telemetry::Metrics;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Keeps the catalog in line with what each node reports.
pub struct SyncCoordinator {
    registry: Arc<dyn NodeRegistry>,
    client: Arc<dyn NodeContentClient>,
    catalog: Arc<Catalog>,
    metrics: Metrics,
}

impl SyncCoordinator {
    /// Wire a coordinator to its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        client: Arc<dyn NodeContentClient>,
        catalog: Arc<Catalog>,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            client,
            catalog,
            metrics,
        }
    }

    /// Catalog this coordinator writes to.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Rebuild the catalog from every reachable node.
    ///
    /// Nodes that are down or fail to list are skipped. Returns the new
    /// item count.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Node`] when the registry cannot list the fleet; the
    /// catalog is left untouched in that case.
    pub async fn full_sync(&self) -> AppResult<usize> {
        let nodes = self
            .registry
            .list_nodes()
            .await
            .map_err(|err| AppError::node("sync.list_nodes", err))?;

        let mut listings = JoinSet::new();
        for node in nodes {
            if !node.is_up {
                debug!(node_id = %node.id, "skipping down node during full sync");
                continue;
            }
            let client = Arc::clone(&self.client);
            listings.spawn(async move {
                let listing = client.list_media(&node).await;
                (node, listing)
            });
        }

        let mut items: Vec<MediaItem> = Vec::new();
        let mut synced = 0_usize;
        while let Some(joined) = listings.join_next().await {
            match joined {
                Ok((node, Ok(listing))) => {
                    synced += 1;
                    items.extend(attribute(&node, listing));
                }
                Ok((node, Err(err))) => {
                    warn!(node_id = %node.id, error = %err, "node listing failed; skipping node");
                }
                Err(err) => warn!(error = %err, "node listing task failed"),
            }
        }

        let count = self.catalog.replace_all(items).await;
        self.metrics.set_catalog_items(count);
        info!(nodes = synced, items = count, "catalog rebuilt");
        Ok(count)
    }

    /// Refresh one node's rows, replacing whatever the catalog held for it.
    /// Returns the new item count.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Node`] when the node cannot be resolved or does not
    /// answer; its existing rows are kept in that case.
    pub async fn sync_node(&self, node_id: &str) -> AppResult<usize> {
        let node = self
            .registry
            .get_node(node_id)
            .await
            .map_err(|err| AppError::node("sync.get_node", err))?;
        let listing = self
            .client
            .list_media(&node)
            .await
            .map_err(|err| AppError::node("sync.list_media", err))?;
        let fetched = listing.len();

        let count = self.catalog.replace_node(&node.id, listing).await;
        self.metrics.set_catalog_items(count);
        info!(node_id = %node.id, fetched, items = count, "node synced");
        Ok(count)
    }

    /// Drop every row owned by `node_id`. Returns how many were removed.
    pub async fn remove_node(&self, node_id: &str) -> usize {
        let removed = self.catalog.remove_node(node_id).await;
        self.metrics.set_catalog_items(self.catalog.len().await);
        info!(node_id = %node_id, removed, "node removed from catalog");
        removed
    }
}

fn attribute(node: &NodeConfig, listing: Vec<MediaItem>) -> impl Iterator<Item = MediaItem> + '_ {
    listing.into_iter().map(move |mut item| {
        node.id.clone_into(&mut item.node_id);
        item
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediafleet_test_support::{FakeContentClient, FakeRegistry, media_item, node};

    fn ids(items: &[MediaItem]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    fn coordinator(
        registry: FakeRegistry,
        client: &Arc<FakeContentClient>,
    ) -> anyhow::Result<(SyncCoordinator, Metrics)> {
        let metrics = Metrics::new()?;
        let sync = SyncCoordinator::new(
            Arc::new(registry),
            Arc::clone(client) as Arc<dyn NodeContentClient>,
            Arc::new(Catalog::new()),
            metrics.clone(),
        );
        Ok((sync, metrics))
    }

    #[tokio::test]
    async fn full_sync_skips_down_and_unreachable_nodes() -> anyhow::Result<()> {
        let mut down = node("n3");
        down.is_up = false;
        let registry = FakeRegistry::with_nodes([node("n1"), node("n2"), down]);
        let client = Arc::new(FakeContentClient::default());
        client
            .with_listing("n1", vec![media_item("n1", "m1", "b", "mp3")])
            .with_listing("n3", vec![media_item("n3", "m9", "z", "mp3")]);
        let (sync, metrics) = coordinator(registry, &client)?;

        assert_eq!(sync.full_sync().await?, 1);
        assert_eq!(ids(&sync.catalog().snapshot().await), vec!["m1"]);
        assert_eq!(metrics.snapshot().catalog_items, 1);
        Ok(())
    }

    #[tokio::test]
    async fn node_sync_replaces_only_that_node() -> anyhow::Result<()> {
        let registry = FakeRegistry::with_nodes([node("n1"), node("n2"), node("n4")]);
        let client = Arc::new(FakeContentClient::default());
        client
            .with_listing("n1", vec![media_item("n1", "m1", "a", "mp3")])
            .with_listing("n2", vec![media_item("n2", "old", "b", "mp3")]);
        let (sync, _metrics) = coordinator(registry, &client)?;
        sync.full_sync().await?;

        client.with_listing("n2", vec![media_item("n2", "new", "c", "flac")]);
        assert_eq!(sync.sync_node("n2").await?, 2);
        assert_eq!(ids(&sync.catalog().snapshot().await), vec!["new", "m1"]);

        assert!(matches!(
            sync.sync_node("n4").await,
            Err(AppError::Node {
                operation: "sync.list_media",
                ..
            })
        ));
        assert!(matches!(
            sync.sync_node("absent").await,
            Err(AppError::Node {
                operation: "sync.get_node",
                ..
            })
        ));
        assert_eq!(sync.catalog().len().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn remove_node_leaves_other_rows_identical() -> anyhow::Result<()> {
        let registry = FakeRegistry::with_nodes([node("n1"), node("n2")]);
        let client = Arc::new(FakeContentClient::default());
        client
            .with_listing(
                "n1",
                vec![
                    media_item("n1", "m1", "a", "mp3"),
                    media_item("n1", "m2", "b", "wav"),
                ],
            )
            .with_listing("n2", vec![media_item("n2", "m3", "c", "mp3")]);
        let (sync, metrics) = coordinator(registry, &client)?;
        sync.full_sync().await?;
        let kept: Vec<MediaItem> = sync
            .catalog()
            .snapshot()
            .await
            .into_iter()
            .filter(|item| item.node_id != "n2")
            .collect();

        assert_eq!(sync.remove_node("n2").await, 1);
        assert_eq!(sync.catalog().snapshot().await, kept);
        assert_eq!(metrics.snapshot().catalog_items, 2);
        Ok(())
    }
}
