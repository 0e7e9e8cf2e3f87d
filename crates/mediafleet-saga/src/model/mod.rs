//! Saga records and the rules for applying per-node replies.

mod changeset;
mod transfer;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub use changeset::{Changeset, ChangesetStatus};
pub use transfer::{Transfer, TransferStatus};

/// A persisted saga record.
pub trait SagaRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Saga kind used in logs, metrics, and storage paths.
    const KIND: &'static str;

    /// Record id.
    fn id(&self) -> Uuid;

    /// Creation time, used to order listings.
    fn created_at(&self) -> DateTime<Utc>;
}

/// Why a reply left the record untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The saga already reached a status that accepts no replies.
    Terminal,
    /// The node is not part of the saga.
    UnknownNode,
    /// The node already replied.
    AlreadyReplied,
}

impl DiscardReason {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::UnknownNode => "unknown_node",
            Self::AlreadyReplied => "already_replied",
        }
    }
}

/// Effect of applying one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Nothing changed.
    Discarded(DiscardReason),
    /// The reply was recorded; other nodes are still outstanding.
    Recorded,
    /// The reply reported failure and the saga is now failed.
    Failed,
    /// Every node has replied successfully.
    AllNodesDone,
}

impl ReplyOutcome {
    /// Whether the record must be persisted.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        !matches!(self, Self::Discarded(_))
    }
}

/// Mark `node_id` as replied, refusing unknown nodes and repeats.
fn mark_replied(outputs: &mut BTreeMap<String, bool>, node_id: &str) -> Result<(), DiscardReason> {
    match outputs.get_mut(node_id) {
        None => Err(DiscardReason::UnknownNode),
        Some(replied) if *replied => Err(DiscardReason::AlreadyReplied),
        Some(replied) => {
            *replied = true;
            Ok(())
        }
    }
}

fn failure_text(node_id: &str, reason: Option<String>) -> String {
    reason
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| format!("node {node_id} reported a failure"))
}

fn pending_nodes(outputs: &BTreeMap<String, bool>) -> Vec<&str> {
    outputs
        .iter()
        .filter(|(_, replied)| !**replied)
        .map(|(node_id, _)| node_id.as_str())
        .collect()
}
