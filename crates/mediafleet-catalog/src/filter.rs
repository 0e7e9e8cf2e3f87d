//! Composable catalog filters. Every present filter must match.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::model::MediaItem;

/// Top-level item field a filter can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterField {
    /// `id`
    Id,
    /// `nodeId`
    NodeId,
    /// `name`
    Name,
    /// `extension`
    Extension,
}

impl FilterField {
    fn value(self, item: &MediaItem) -> &str {
        match self {
            Self::Id => &item.id,
            Self::NodeId => &item.node_id,
            Self::Name => &item.name,
            Self::Extension => &item.extension,
        }
    }
}

impl FromStr for FilterField {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "id" => Ok(Self::Id),
            "nodeId" => Ok(Self::NodeId),
            "name" => Ok(Self::Name),
            "extension" => Ok(Self::Extension),
            _ => Err(CatalogError::UnknownFilterField {
                value: value.to_string(),
            }),
        }
    }
}

/// Hide items whose `field` is one of `values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeFilter {
    /// Field tested.
    pub field: FilterField,
    /// Values that hide an item.
    pub values: Vec<String>,
}

impl ExcludeFilter {
    /// Exclude every item owned by one of `node_ids`.
    #[must_use]
    pub fn nodes(node_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            field: FilterField::NodeId,
            values: node_ids.into_iter().collect(),
        }
    }

    fn excludes(&self, item: &MediaItem) -> bool {
        let value = self.field.value(item);
        self.values.iter().any(|candidate| candidate == value)
    }
}

/// Conjunction of optional filters. An empty list means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaFilter {
    /// Single media id; at most one item is returned.
    pub id: Option<String>,
    /// Any-of media ids.
    pub ids: Vec<String>,
    /// Any-of owning nodes.
    pub node_ids: Vec<String>,
    /// Any-of extensions, compared case-insensitively.
    pub media_types: Vec<String>,
    /// Exclusion applied after the inclusive filters.
    pub exclude: Option<ExcludeFilter>,
}

impl MediaFilter {
    /// Whether `item` passes every present filter.
    #[must_use]
    pub fn matches(&self, item: &MediaItem) -> bool {
        if let Some(id) = &self.id
            && &item.id != id
        {
            return false;
        }
        if !self.ids.is_empty() && !self.ids.contains(&item.id) {
            return false;
        }
        if !self.node_ids.is_empty() && !self.node_ids.contains(&item.node_id) {
            return false;
        }
        if !self.media_types.is_empty()
            && !self
                .media_types
                .iter()
                .any(|media_type| media_type.eq_ignore_ascii_case(&item.extension))
        {
            return false;
        }
        !self
            .exclude
            .as_ref()
            .is_some_and(|exclude| exclude.excludes(item))
    }

    /// Clone the matching items, preserving input order.
    pub fn apply<'a>(&self, items: impl IntoIterator<Item = &'a MediaItem>) -> Vec<MediaItem> {
        let mut matching = items.into_iter().filter(|item| self.matches(item));
        if self.id.is_some() {
            return matching.next().cloned().into_iter().collect();
        }
        matching.cloned().collect()
    }
}
