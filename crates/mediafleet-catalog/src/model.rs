//! Media item as reported by its owning node.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One media object held by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    /// Node-assigned media id.
    pub id: String,
    /// Owning node.
    #[serde(default)]
    pub node_id: String,
    /// Display name (usually the file stem).
    pub name: String,
    /// File extension without the dot.
    pub extension: String,
    /// Extension-dependent attributes (album, artist, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MediaItem {
    /// Metadata value as a string slice, when present and textual.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Canonical catalog order: grouped by extension, then by name.
///
/// Node and media ids settle the remaining ties so rebuilds are deterministic.
#[must_use]
pub fn catalog_order(left: &MediaItem, right: &MediaItem) -> Ordering {
    left.extension
        .cmp(&right.extension)
        .then_with(|| left.name.cmp(&right.name))
        .then_with(|| left.node_id.cmp(&right.node_id))
        .then_with(|| left.id.cmp(&right.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialises_listing_without_node_id() -> Result<(), serde_json::Error> {
        let item: MediaItem = serde_json::from_value(json!({
            "id": "m1",
            "name": "Intro",
            "extension": "mp3",
            "metadata": {"album": "First", "trackNumber": 1},
        }))?;
        assert_eq!(item.node_id, "");
        assert_eq!(item.metadata_str("album"), Some("First"));
        assert_eq!(item.metadata_str("trackNumber"), None);
        Ok(())
    }

    #[test]
    fn catalog_order_groups_by_extension_first() {
        let item = |name: &str, extension: &str| MediaItem {
            id: name.into(),
            node_id: "n".into(),
            name: name.into(),
            extension: extension.into(),
            metadata: Map::new(),
        };
        let mut items = vec![item("b", "mp3"), item("a", "wav"), item("a", "mp3")];
        items.sort_by(catalog_order);
        let order: Vec<_> = items
            .iter()
            .map(|item| format!("{}.{}", item.name, item.extension))
            .collect();
        assert_eq!(order, vec!["a.mp3", "b.mp3", "a.wav"]);
    }
}
