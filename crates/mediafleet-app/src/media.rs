//! Catalog queries and media operations exposed to API callers.
//!
//! Items owned by nodes that are currently down stay in the catalog but are
//! hidden from every query; naming a down node explicitly is rejected.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use mediafleet_catalog::{
    Catalog, ExcludeFilter, MediaFilter, MediaItem, MediaQuery, Page, PageRequest, SortOrder,
};
use mediafleet_download::{DownloadQueue, media_jobs};
use mediafleet_events::{MediaDelete, Message, Publisher};
use mediafleet_nodes::{NodeConfig, NodeContentClient, NodeRegistry};
use mediafleet_saga::{Transfer, TransferCoordinator, TransferRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

/// One media item addressed by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    /// Owning node.
    pub node_id: String,
    /// Media id on that node.
    pub media_id: String,
}

impl MediaRef {
    /// Address `media_id` on `node_id`.
    #[must_use]
    pub fn new(node_id: impl Into<String>, media_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            media_id: media_id.into(),
        }
    }
}

/// Inclusive catalog constraints; an empty list means no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaRequest {
    /// Any-of extensions.
    pub media_types: Vec<String>,
    /// Any-of owning nodes.
    pub node_ids: Vec<String>,
    /// Any-of media ids.
    pub ids: Vec<String>,
}

/// Read and write paths over the fleet's media.
pub struct MediaService {
    catalog: Arc<Catalog>,
    registry: Arc<dyn NodeRegistry>,
    client: Arc<dyn NodeContentClient>,
    queue: DownloadQueue,
    transfers: Arc<TransferCoordinator>,
    publisher: Publisher,
}

impl MediaService {
    /// Wire the service to its collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<dyn NodeRegistry>,
        client: Arc<dyn NodeContentClient>,
        queue: DownloadQueue,
        transfers: Arc<TransferCoordinator>,
        publisher: Publisher,
    ) -> Self {
        Self {
            catalog,
            registry,
            client,
            queue,
            transfers,
            publisher,
        }
    }

    /// Every visible item matching `request`, in catalog order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NodeDown`] when the request names a down node and
    /// [`AppError::Node`] when the registry cannot be reached.
    pub async fn get_media(&self, request: &MediaRequest) -> AppResult<Vec<MediaItem>> {
        let query = self.visible_query(request, None).await?;
        self.catalog
            .query(&query)
            .await
            .map_err(|err| AppError::catalog("media.get", err))
    }

    /// One page of visible items matching `request`, optionally sorted by an
    /// `asc(field)` or `desc(field)` expression.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed or unsupported sort, a page
    /// past the end, or a down node in the request.
    pub async fn get_media_page(
        &self,
        request: &MediaRequest,
        sort: Option<&str>,
        page: PageRequest,
    ) -> AppResult<Page<MediaItem>> {
        let sort = sort
            .map(str::parse::<SortOrder>)
            .transpose()
            .map_err(|err| AppError::catalog("media.page.sort", err))?;
        let query = self.visible_query(request, sort).await?;
        let items = self
            .catalog
            .query(&query)
            .await
            .map_err(|err| AppError::catalog("media.page.query", err))?;
        page.paginate(items)
            .map_err(|err| AppError::catalog("media.page.paginate", err))
    }

    /// Fetch the items straight from their nodes as one archive.
    ///
    /// A single contributing node's archive is returned as sent; several are
    /// merged.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty request, an unknown item or a
    /// down owner, and [`AppError::Download`] when any node fetch fails.
    pub async fn download_media(&self, items: &[MediaRef]) -> AppResult<Vec<u8>> {
        if items.is_empty() {
            return Err(AppError::EmptyRequest {
                operation: "media.download",
            });
        }

        let mut nodes: HashMap<String, NodeConfig> = HashMap::new();
        let mut pairs = Vec::with_capacity(items.len());
        for item in items {
            self.require_known(item).await?;
            let node = match nodes.get(&item.node_id) {
                Some(node) => node.clone(),
                None => {
                    let node = self.require_up(&item.node_id).await?;
                    nodes.insert(node.id.clone(), node.clone());
                    node
                }
            };
            pairs.push((node, item.media_id.clone()));
        }

        let jobs = media_jobs(pairs);
        debug!(nodes = jobs.len(), items = items.len(), "starting media download");
        self.queue
            .fetch(jobs)
            .await
            .map_err(|err| AppError::download("media.download", err))
    }

    /// Start a transfer of the items to the manager itself. The archive is
    /// collected later through the transfer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Saga`] when the transfer is rejected or cannot be
    /// announced.
    pub async fn download_media_async(&self, items: &[MediaRef]) -> AppResult<Transfer> {
        let request = TransferRequest {
            target_id: None,
            items: items
                .iter()
                .map(|item| (item.node_id.clone(), item.media_id.clone()))
                .collect(),
        };
        self.transfers
            .create(request)
            .await
            .map_err(|err| AppError::saga("media.download_async", err))
    }

    /// Ask the owning nodes to delete the items.
    ///
    /// Returns the published partition. Nodes delete asynchronously and
    /// announce the change through `node.media_changed`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EmptyRequest`] for no items and [`AppError::Bus`]
    /// when the request could not be published.
    pub async fn delete_media(&self, items: &[MediaRef]) -> AppResult<MediaDelete> {
        if items.is_empty() {
            return Err(AppError::EmptyRequest {
                operation: "media.delete",
            });
        }
        let mut media_to_delete: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for item in items {
            let ids = media_to_delete.entry(item.node_id.clone()).or_default();
            if !ids.contains(&item.media_id) {
                ids.push(item.media_id.clone());
            }
        }

        let request = MediaDelete { media_to_delete };
        self.publisher
            .publish(Message::MediaDelete(request.clone()))
            .await
            .map_err(|err| AppError::bus("media.delete", err))?;
        info!(nodes = request.media_to_delete.len(), "media deletion requested");
        Ok(request)
    }

    /// Raw content of one item, fetched from its owner.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown item or a down owner and
    /// [`AppError::Node`] when the node fails.
    pub async fn stream_media(&self, item: &MediaRef) -> AppResult<Vec<u8>> {
        self.require_known(item).await?;
        let node = self.require_up(&item.node_id).await?;
        self.client
            .stream_media(&node, &item.media_id)
            .await
            .map_err(|err| AppError::node("media.stream", err))
    }

    /// Embedded cover art of one item, fetched from its owner.
    ///
    /// # Errors
    ///
    /// See [`Self::stream_media`].
    pub async fn media_art(&self, item: &MediaRef) -> AppResult<Vec<u8>> {
        self.require_known(item).await?;
        let node = self.require_up(&item.node_id).await?;
        self.client
            .media_art(&node, &item.media_id)
            .await
            .map_err(|err| AppError::node("media.art", err))
    }

    async fn visible_query(
        &self,
        request: &MediaRequest,
        sort: Option<SortOrder>,
    ) -> AppResult<MediaQuery> {
        let down = self.down_nodes().await?;
        if let Some(node_id) = request.node_ids.iter().find(|id| down.contains(*id)) {
            return Err(AppError::NodeDown {
                node_id: node_id.clone(),
            });
        }
        let exclude = (!down.is_empty()).then(|| ExcludeFilter::nodes(down));
        Ok(MediaQuery {
            filter: MediaFilter {
                ids: request.ids.clone(),
                node_ids: request.node_ids.clone(),
                media_types: request.media_types.clone(),
                exclude,
                ..MediaFilter::default()
            },
            sort,
        })
    }

    async fn down_nodes(&self) -> AppResult<BTreeSet<String>> {
        let nodes = self
            .registry
            .list_nodes()
            .await
            .map_err(|err| AppError::node("media.list_nodes", err))?;
        Ok(nodes
            .into_iter()
            .filter(|node| !node.is_up)
            .map(|node| node.id)
            .collect())
    }

    async fn require_known(&self, item: &MediaRef) -> AppResult<()> {
        if self.catalog.find(&item.node_id, &item.media_id).await.is_none() {
            return Err(AppError::UnknownMedia {
                node_id: item.node_id.clone(),
                media_id: item.media_id.clone(),
            });
        }
        Ok(())
    }

    async fn require_up(&self, node_id: &str) -> AppResult<NodeConfig> {
        let node = self
            .registry
            .get_node(node_id)
            .await
            .map_err(|err| AppError::node("media.get_node", err))?;
        if !node.is_up {
            return Err(AppError::NodeDown {
                node_id: node.id,
            });
        }
        Ok(node)
    }
}
