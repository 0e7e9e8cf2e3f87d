use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use mediafleet_events::ChangesetItem;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DiscardReason, ReplyOutcome, SagaRecord, failure_text, mark_replied, pending_nodes};

/// Lifecycle of a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangesetStatus {
    /// Recorded, request not yet published.
    Pending,
    /// Request published, waiting for node replies.
    InProgress,
    /// Every node applied its edits.
    Complete,
    /// A node failed or the request could not be published.
    Failed,
}

impl ChangesetStatus {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Whether replies are still accepted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl Display for ChangesetStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bulk metadata edit spanning several nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changeset {
    /// Saga id.
    pub id: Uuid,
    /// Requested edits partitioned by owning node.
    pub inputs: BTreeMap<String, Vec<ChangesetItem>>,
    /// Which nodes have replied. Keys are exactly the keys of `inputs`.
    pub outputs: BTreeMap<String, bool>,
    /// Current status.
    pub status: ChangesetStatus,
    /// Reason recorded when the changeset failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Changeset {
    /// New pending changeset expecting one reply per input node.
    #[must_use]
    pub fn new(inputs: BTreeMap<String, Vec<ChangesetItem>>) -> Self {
        let outputs = inputs.keys().map(|node_id| (node_id.clone(), false)).collect();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            inputs,
            outputs,
            status: ChangesetStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether every node has replied.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.outputs.values().all(|replied| *replied)
    }

    /// Nodes that have not replied yet.
    #[must_use]
    pub fn pending_nodes(&self) -> Vec<&str> {
        pending_nodes(&self.outputs)
    }

    /// Move to `status`, stamping the update time.
    pub fn transition(&mut self, status: ChangesetStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Mark the changeset failed with `reason`.
    pub fn set_failed(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.transition(ChangesetStatus::Failed);
    }

    /// Apply one node's reply.
    ///
    /// Terminal changesets, unknown nodes, and repeated replies are discarded
    /// without mutation. A failure flips the whole changeset to failed; it
    /// completes once every node has replied successfully.
    pub fn apply_reply(
        &mut self,
        node_id: &str,
        success: bool,
        failure_reason: Option<String>,
    ) -> ReplyOutcome {
        if self.status.is_terminal() {
            return ReplyOutcome::Discarded(DiscardReason::Terminal);
        }
        if let Err(reason) = mark_replied(&mut self.outputs, node_id) {
            return ReplyOutcome::Discarded(reason);
        }
        if !success {
            self.set_failed(failure_text(node_id, failure_reason));
            return ReplyOutcome::Failed;
        }
        if self.is_done() {
            self.transition(ChangesetStatus::Complete);
            return ReplyOutcome::AllNodesDone;
        }
        self.updated_at = Utc::now();
        ReplyOutcome::Recorded
    }
}

impl SagaRecord for Changeset {
    const KIND: &'static str = "changeset";

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediafleet_events::MediaChange;

    fn item(media_id: &str) -> ChangesetItem {
        ChangesetItem {
            media_id: media_id.to_string(),
            change: MediaChange {
                title: Some("New".into()),
                ..MediaChange::default()
            },
        }
    }

    fn two_node_changeset() -> Changeset {
        let mut changeset = Changeset::new(BTreeMap::from([
            ("n1".to_string(), vec![item("c1")]),
            ("n2".to_string(), vec![item("c2")]),
        ]));
        changeset.transition(ChangesetStatus::InProgress);
        changeset
    }

    #[test]
    fn outputs_mirror_input_nodes() {
        let changeset = two_node_changeset();
        assert_eq!(
            changeset.outputs.keys().collect::<Vec<_>>(),
            changeset.inputs.keys().collect::<Vec<_>>()
        );
        assert!(changeset.outputs.values().all(|replied| !replied));
    }

    #[test]
    fn first_success_does_not_complete() {
        let mut changeset = two_node_changeset();
        assert_eq!(changeset.apply_reply("n1", true, None), ReplyOutcome::Recorded);
        assert_eq!(changeset.status, ChangesetStatus::InProgress);
        assert_eq!(changeset.pending_nodes(), vec!["n2"]);

        assert_eq!(changeset.apply_reply("n2", true, None), ReplyOutcome::AllNodesDone);
        assert_eq!(changeset.status, ChangesetStatus::Complete);
    }

    #[test]
    fn one_failure_fails_the_changeset() {
        let mut changeset = two_node_changeset();
        changeset.apply_reply("n1", true, None);
        assert_eq!(
            changeset.apply_reply("n2", false, Some("disk full".into())),
            ReplyOutcome::Failed
        );
        assert_eq!(changeset.status, ChangesetStatus::Failed);
        assert_eq!(changeset.failure_reason.as_deref(), Some("disk full"));
    }

    #[test]
    fn repeated_and_late_replies_are_discarded() {
        let mut changeset = two_node_changeset();
        changeset.apply_reply("n1", true, None);
        let before = changeset.clone();
        assert_eq!(
            changeset.apply_reply("n1", false, Some("late".into())),
            ReplyOutcome::Discarded(DiscardReason::AlreadyReplied)
        );
        assert_eq!(
            changeset.apply_reply("n9", true, None),
            ReplyOutcome::Discarded(DiscardReason::UnknownNode)
        );
        assert_eq!(changeset, before);

        changeset.apply_reply("n2", false, None);
        let failed = changeset.clone();
        assert_eq!(
            changeset.apply_reply("n1", true, None),
            ReplyOutcome::Discarded(DiscardReason::Terminal)
        );
        assert_eq!(changeset, failed);
    }

    #[test]
    fn serializes_with_snake_case_status() -> anyhow::Result<()> {
        let changeset = two_node_changeset();
        let value = serde_json::to_value(&changeset)?;
        assert_eq!(value["status"], "in_progress");
        assert_eq!(value["outputs"]["n1"], false);
        let back: Changeset = serde_json::from_value(value)?;
        assert_eq!(back, changeset);
        Ok(())
    }
}
