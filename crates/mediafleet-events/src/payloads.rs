//! Typed message bodies exchanged with media hosts.
//!
//! Field names are camelCase on the wire. Node ids are opaque strings assigned
//! by the service registry; saga ids are UUIDs assigned by the manager.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::topics::Topic;

/// Identifier assigned to each message published through a bus instance.
pub type MessageId = u64;

/// Every message the control plane produces or consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "topic")]
pub enum Message {
    /// `node.ready`
    #[serde(rename = "node.ready")]
    NodeReady(NodeReady),
    /// `node.media_changed`
    #[serde(rename = "node.media_changed")]
    NodeMediaChanged(NodeMediaChanged),
    /// `transfer.requested`
    #[serde(rename = "transfer.requested")]
    TransferRequested(TransferRequested),
    /// `transfer.node_update`
    #[serde(rename = "transfer.node_update")]
    TransferNodeUpdate(TransferNodeUpdate),
    /// `transfer.ready`
    #[serde(rename = "transfer.ready")]
    TransferReady(TransferReady),
    /// `transfer.ready_update`
    #[serde(rename = "transfer.ready_update")]
    TransferReadyUpdate(TransferReadyUpdate),
    /// `changeset.requested`
    #[serde(rename = "changeset.requested")]
    ChangesetRequested(ChangesetRequested),
    /// `changeset.node_update`
    #[serde(rename = "changeset.node_update")]
    ChangesetNodeUpdate(ChangesetNodeUpdate),
    /// `media.delete`
    #[serde(rename = "media.delete")]
    MediaDelete(MediaDelete),
}

impl Message {
    /// Topic this message is routed under.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::NodeReady(_) => Topic::NodeReady,
            Self::NodeMediaChanged(_) => Topic::NodeMediaChanged,
            Self::TransferRequested(_) => Topic::TransferRequested,
            Self::TransferNodeUpdate(_) => Topic::TransferNodeUpdate,
            Self::TransferReady(_) => Topic::TransferReady,
            Self::TransferReadyUpdate(_) => Topic::TransferReadyUpdate,
            Self::ChangesetRequested(_) => Topic::ChangesetRequested,
            Self::ChangesetNodeUpdate(_) => Topic::ChangesetNodeUpdate,
            Self::MediaDelete(_) => Topic::MediaDelete,
        }
    }
}

/// Metadata wrapper around messages. Each envelope tracks the message id and
/// publish timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Sequential identifier assigned by the bus.
    pub id: MessageId,
    /// Publish timestamp.
    pub timestamp: DateTime<Utc>,
    /// Message body.
    pub message: Message,
}

/// A media host finished starting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeReady {
    /// Registry id of the node.
    pub node_id: String,
    /// Registry service name of the node.
    pub node_name: String,
}

/// A media host's library changed out of band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeMediaChanged {
    /// Registry id of the node.
    pub node_id: String,
}

/// Fan-out request for a transfer; carries the full per-node partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequested {
    /// Transfer saga id.
    pub transfer_id: Uuid,
    /// Node that receives the merged archive.
    pub target_id: String,
    /// Media ids to stage, keyed by owning node.
    pub inputs: BTreeMap<String, Vec<String>>,
}

/// Per-node reply to `transfer.requested`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferNodeUpdate {
    /// Transfer saga id.
    pub transfer_id: Uuid,
    /// Replying node.
    pub node_id: String,
    /// Whether the node staged its share.
    pub success: bool,
    /// Reason reported by the node on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Merged archive forwarded to a transfer's target node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferReady {
    /// Transfer saga id.
    pub transfer_id: Uuid,
    /// Node that receives the archive.
    pub target_id: String,
    /// Archive bytes, base64 on the wire.
    #[serde(with = "content_base64")]
    pub content: Vec<u8>,
}

/// Target node confirmed receipt of a forwarded archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferReadyUpdate {
    /// Transfer saga id.
    pub transfer_id: Uuid,
}

/// Fan-out request for a changeset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetRequested {
    /// Changeset saga id.
    pub changeset_id: Uuid,
    /// Edits keyed by owning node.
    pub inputs: BTreeMap<String, Vec<ChangesetItem>>,
}

/// One metadata edit targeting a single media item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetItem {
    /// Media item to edit.
    pub media_id: String,
    /// Requested edit.
    pub change: MediaChange,
}

/// Requested tag edits. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaChange {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New artist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// New album.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// New comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// New genre.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// New track number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
    /// Total track count paired with `track_number`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_of: Option<u32>,
    /// Path of a replacement cover image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art: Option<String>,
}

/// Per-node reply to `changeset.requested`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetNodeUpdate {
    /// Changeset saga id.
    pub changeset_id: Uuid,
    /// Replying node.
    pub node_id: String,
    /// Whether the node applied its edits.
    pub success: bool,
    /// Reason reported by the node on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Request for nodes to delete media.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaDelete {
    /// Media ids to delete, keyed by owning node.
    pub media_to_delete: BTreeMap<String, Vec<String>>,
}

mod content_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
