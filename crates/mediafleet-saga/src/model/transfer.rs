use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DiscardReason, ReplyOutcome, SagaRecord, failure_text, mark_replied, pending_nodes};

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Recorded, request not yet published.
    Pending,
    /// Request published, waiting for node replies.
    InProgress,
    /// Every node staged its content; the archive is being assembled or
    /// forwarded.
    ProcessingComplete,
    /// The archive was stored locally or the target confirmed receipt.
    Complete,
    /// A node failed, or assembling or forwarding the archive failed.
    Failed,
    /// The stored archive was removed after the expiry passed.
    Expired,
}

impl TransferStatus {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::ProcessingComplete => "processing_complete",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Whether per-node replies are still accepted.
    #[must_use]
    pub const fn accepts_replies(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    /// Whether no reply or receipt can move the transfer any further.
    ///
    /// A complete transfer still expires, but only through the sweep.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Expired)
    }
}

impl Display for TransferStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bulk retrieval of media from several nodes into one archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// Saga id.
    pub id: Uuid,
    /// Node that receives the merged archive.
    pub target_id: String,
    /// Requested media ids partitioned by owning node.
    pub inputs: BTreeMap<String, Vec<String>>,
    /// Which nodes have replied. Keys are exactly the keys of `inputs`.
    pub outputs: BTreeMap<String, bool>,
    /// Current status.
    pub status: TransferStatus,
    /// Reason recorded when the transfer failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Time after which a stored archive is removed.
    pub expiry: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// New pending transfer expiring `lifetime` from now.
    #[must_use]
    pub fn new(
        target_id: impl Into<String>,
        inputs: BTreeMap<String, Vec<String>>,
        lifetime: Duration,
    ) -> Self {
        let outputs = inputs.keys().map(|node_id| (node_id.clone(), false)).collect();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            inputs,
            outputs,
            status: TransferStatus::Pending,
            failure_reason: None,
            expiry: now + lifetime,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether every node has replied.
    #[must_use]
    pub fn all_nodes_handled(&self) -> bool {
        self.outputs.values().all(|replied| *replied)
    }

    /// Whether the transfer is failed.
    #[must_use]
    pub fn did_fail(&self) -> bool {
        self.status == TransferStatus::Failed
    }

    /// Whether the expiry has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Nodes that have not replied yet.
    #[must_use]
    pub fn pending_nodes(&self) -> Vec<&str> {
        pending_nodes(&self.outputs)
    }

    /// Move to `status`, stamping the update time.
    pub fn transition(&mut self, status: TransferStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Mark the transfer failed with `reason`.
    pub fn set_failed(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.transition(TransferStatus::Failed);
    }

    /// Apply one node's reply.
    ///
    /// Only pending and in-progress transfers accept replies. A failure flips
    /// the transfer to failed; once every node has replied successfully it
    /// moves to `processing_complete`.
    pub fn apply_reply(
        &mut self,
        node_id: &str,
        success: bool,
        failure_reason: Option<String>,
    ) -> ReplyOutcome {
        if !self.status.accepts_replies() {
            return ReplyOutcome::Discarded(DiscardReason::Terminal);
        }
        if let Err(reason) = mark_replied(&mut self.outputs, node_id) {
            return ReplyOutcome::Discarded(reason);
        }
        if !success {
            self.set_failed(failure_text(node_id, failure_reason));
            return ReplyOutcome::Failed;
        }
        if self.all_nodes_handled() {
            self.transition(TransferStatus::ProcessingComplete);
            return ReplyOutcome::AllNodesDone;
        }
        self.updated_at = Utc::now();
        ReplyOutcome::Recorded
    }
}

impl SagaRecord for Transfer {
    const KIND: &'static str = "transfer";

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
