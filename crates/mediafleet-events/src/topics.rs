//! Routing keys for every message the control plane produces or consumes.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Topic a message is routed under on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    /// A media host finished starting and is ready to be synced.
    #[serde(rename = "node.ready")]
    NodeReady,
    /// A media host reported that its library changed.
    #[serde(rename = "node.media_changed")]
    NodeMediaChanged,
    /// Fan-out request asking input nodes to stage a transfer.
    #[serde(rename = "transfer.requested")]
    TransferRequested,
    /// Per-node reply to a transfer request.
    #[serde(rename = "transfer.node_update")]
    TransferNodeUpdate,
    /// Merged transfer archive forwarded to the target node.
    #[serde(rename = "transfer.ready")]
    TransferReady,
    /// Target node confirmed receipt of a forwarded archive.
    #[serde(rename = "transfer.ready_update")]
    TransferReadyUpdate,
    /// Fan-out request asking nodes to apply metadata edits.
    #[serde(rename = "changeset.requested")]
    ChangesetRequested,
    /// Per-node reply to a changeset request.
    #[serde(rename = "changeset.node_update")]
    ChangesetNodeUpdate,
    /// Request for nodes to delete the listed media.
    #[serde(rename = "media.delete")]
    MediaDelete,
}

impl Topic {
    /// Every topic known to the control plane.
    pub const ALL: [Self; 9] = [
        Self::NodeReady,
        Self::NodeMediaChanged,
        Self::TransferRequested,
        Self::TransferNodeUpdate,
        Self::TransferReady,
        Self::TransferReadyUpdate,
        Self::ChangesetRequested,
        Self::ChangesetNodeUpdate,
        Self::MediaDelete,
    ];

    /// Routing key used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NodeReady => "node.ready",
            Self::NodeMediaChanged => "node.media_changed",
            Self::TransferRequested => "transfer.requested",
            Self::TransferNodeUpdate => "transfer.node_update",
            Self::TransferReady => "transfer.ready",
            Self::TransferReadyUpdate => "transfer.ready_update",
            Self::ChangesetRequested => "changeset.requested",
            Self::ChangesetNodeUpdate => "changeset.node_update",
            Self::MediaDelete => "media.delete",
        }
    }
}

impl Display for Topic {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = BusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.as_str() == value)
            .ok_or_else(|| BusError::UnknownTopic {
                value: value.to_string(),
            })
    }
}
