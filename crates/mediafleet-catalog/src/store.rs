//! Shared catalog index.
//!
//! The whole entry set sits behind one reader/writer lock. Writers either
//! replace everything, replace one node's rows, or delete one node's rows, so a
//! reader always observes a complete snapshot.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CatalogResult;
use crate::filter::MediaFilter;
use crate::model::{MediaItem, catalog_order};
use crate::sort::{SortOrder, sort_items};

/// Filter plus optional ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaQuery {
    /// Items must pass this filter.
    pub filter: MediaFilter,
    /// Ordering applied after filtering; catalog order when absent.
    pub sort: Option<SortOrder>,
}

/// Merged, sorted view of every node's media.
#[derive(Default)]
pub struct Catalog {
    entries: RwLock<Vec<MediaItem>>,
}

impl Catalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole entry set. Returns the new item count.
    pub async fn replace_all(&self, mut items: Vec<MediaItem>) -> usize {
        items.sort_by(catalog_order);
        let count = items.len();
        *self.entries.write().await = items;
        debug!(items = count, "catalog replaced");
        count
    }

    /// Replace the rows owned by `node_id` with `items`, attributing each to the node.
    /// Returns the new item count.
    pub async fn replace_node(&self, node_id: &str, items: Vec<MediaItem>) -> usize {
        let mut guard = self.entries.write().await;
        let mut merged: Vec<MediaItem> = guard
            .iter()
            .filter(|item| item.node_id != node_id)
            .cloned()
            .collect();
        merged.extend(items.into_iter().map(|mut item| {
            node_id.clone_into(&mut item.node_id);
            item
        }));
        merged.sort_by(catalog_order);
        let count = merged.len();
        *guard = merged;
        drop(guard);
        debug!(node_id = %node_id, items = count, "catalog merged node listing");
        count
    }

    /// Delete every row owned by `node_id`, leaving other rows untouched.
    /// Returns how many rows were removed.
    pub async fn remove_node(&self, node_id: &str) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|item| item.node_id != node_id);
        let removed = before - guard.len();
        drop(guard);
        debug!(node_id = %node_id, removed, "catalog removed node rows");
        removed
    }

    /// Copy of the full entry set in catalog order.
    pub async fn snapshot(&self) -> Vec<MediaItem> {
        self.entries.read().await.clone()
    }

    /// Number of items held.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the catalog holds no items.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Look up one item by owner and id.
    pub async fn find(&self, node_id: &str, media_id: &str) -> Option<MediaItem> {
        self.entries
            .read()
            .await
            .iter()
            .find(|item| item.node_id == node_id && item.id == media_id)
            .cloned()
    }

    /// Distinct node ids with at least one row.
    pub async fn node_ids(&self) -> BTreeSet<String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|item| item.node_id.clone())
            .collect()
    }

    /// Filter, then optionally sort, against one consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the sort field is not supported by
    /// one of the filtered items.
    pub async fn query(&self, query: &MediaQuery) -> CatalogResult<Vec<MediaItem>> {
        let mut items = query.filter.apply(self.entries.read().await.iter());
        if let Some(order) = &query.sort {
            sort_items(&mut items, order)?;
        }
        Ok(items)
    }
}
