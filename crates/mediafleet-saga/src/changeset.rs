//! Changeset coordinator.

use std::collections::BTreeMap;
use std::sync::Arc;

use mediafleet_catalog::Catalog;
use mediafleet_events::{
    ChangesetItem, ChangesetNodeUpdate, ChangesetRequested, MediaChange, Message, Publisher,
};
use mediafleet_telemetry::Metrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SagaError, SagaResult};
use crate::locks::RecordLocks;
use crate::model::{Changeset, ChangesetStatus, ReplyOutcome, SagaRecord};
use crate::recipe::apply_change;
use crate::store::RecordStore;

/// One requested edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    /// Node owning the item.
    pub node_id: String,
    /// Item to edit.
    pub media_id: String,
    /// Requested edit.
    pub change: MediaChange,
}

/// Creates changesets and applies node replies to them.
pub struct ChangesetCoordinator {
    store: Arc<dyn RecordStore<Changeset>>,
    catalog: Arc<Catalog>,
    publisher: Publisher,
    metrics: Metrics,
    locks: RecordLocks,
}

impl ChangesetCoordinator {
    /// Wire a coordinator to its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore<Changeset>>,
        catalog: Arc<Catalog>,
        publisher: Publisher,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            catalog,
            publisher,
            metrics,
            locks: RecordLocks::default(),
        }
    }

    /// Validate and record a changeset, then announce it to the nodes.
    ///
    /// Returns as soon as the request is published; node replies arrive
    /// later through [`Self::apply_reply`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty request, an item the catalog
    /// does not hold, or a change that edits nothing. Returns
    /// [`SagaError::Publish`] if the request could not be published, in
    /// which case the stored changeset is failed.
    pub async fn create(&self, requests: Vec<ChangeRequest>) -> SagaResult<Changeset> {
        if requests.is_empty() {
            return Err(SagaError::EmptyRequest {
                saga: Changeset::KIND,
            });
        }

        let mut inputs: BTreeMap<String, Vec<ChangesetItem>> = BTreeMap::new();
        for request in requests {
            let item = self
                .catalog
                .find(&request.node_id, &request.media_id)
                .await
                .ok_or_else(|| SagaError::UnknownMedia {
                    node_id: request.node_id.clone(),
                    media_id: request.media_id.clone(),
                })?;
            let recipe = apply_change(&item, &request.change);
            for field in &recipe.ignored {
                warn!(
                    media_id = %item.id,
                    extension = %item.extension,
                    field,
                    "field not supported for this format; ignoring"
                );
            }
            if recipe.is_noop() {
                return Err(SagaError::EmptyChange {
                    media_id: request.media_id,
                });
            }
            debug!(
                node_id = %request.node_id,
                media_id = %item.id,
                args = ?recipe.to_args(),
                "edit planned"
            );
            inputs.entry(request.node_id).or_default().push(ChangesetItem {
                media_id: request.media_id,
                change: request.change,
            });
        }

        let mut changeset = Changeset::new(inputs);
        let _guard = self.locks.acquire(changeset.id).await;
        self.store.save(&changeset).await?;
        self.record_transition(ChangesetStatus::Pending);

        let message = Message::ChangesetRequested(ChangesetRequested {
            changeset_id: changeset.id,
            inputs: changeset.inputs.clone(),
        });
        if let Err(err) = self.publisher.publish(message).await {
            warn!(changeset_id = %changeset.id, error = %err, "changeset request not published");
            changeset.set_failed(err.to_string());
            self.store.save(&changeset).await?;
            self.record_transition(ChangesetStatus::Failed);
            self.locks.release(changeset.id);
            return Err(SagaError::publish("changeset.create", err));
        }

        changeset.transition(ChangesetStatus::InProgress);
        self.store.save(&changeset).await?;
        self.record_transition(ChangesetStatus::InProgress);
        info!(
            changeset_id = %changeset.id,
            nodes = changeset.outputs.len(),
            "changeset started"
        );
        Ok(changeset)
    }

    /// Apply one node's reply.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::NotFound`] for an unknown changeset, or a store
    /// error if the record cannot be read or saved.
    pub async fn apply_reply(&self, update: &ChangesetNodeUpdate) -> SagaResult<ReplyOutcome> {
        let _guard = self.locks.acquire(update.changeset_id).await;
        let mut changeset = self.load(update.changeset_id).await?;
        let outcome = changeset.apply_reply(
            &update.node_id,
            update.success,
            update.failure_reason.clone(),
        );

        match outcome {
            ReplyOutcome::Discarded(reason) => {
                self.metrics.inc_reply_discarded(Changeset::KIND);
                debug!(
                    changeset_id = %changeset.id,
                    node_id = %update.node_id,
                    reason = reason.as_str(),
                    status = %changeset.status,
                    "changeset reply discarded"
                );
            }
            ReplyOutcome::Recorded => {
                self.store.save(&changeset).await?;
            }
            ReplyOutcome::Failed => {
                self.store.save(&changeset).await?;
                self.record_transition(ChangesetStatus::Failed);
                warn!(
                    changeset_id = %changeset.id,
                    node_id = %update.node_id,
                    reason = changeset.failure_reason.as_deref().unwrap_or_default(),
                    "changeset failed"
                );
            }
            ReplyOutcome::AllNodesDone => {
                self.store.save(&changeset).await?;
                self.record_transition(ChangesetStatus::Complete);
                info!(changeset_id = %changeset.id, "changeset complete");
            }
        }

        if changeset.status.is_terminal() {
            self.locks.release(changeset.id);
        }
        Ok(outcome)
    }

    /// Fetch a changeset.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::NotFound`] if no changeset has the id.
    pub async fn get(&self, id: Uuid) -> SagaResult<Changeset> {
        self.load(id).await
    }

    /// Every changeset, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the records cannot be read.
    pub async fn list(&self) -> SagaResult<Vec<Changeset>> {
        self.store.all().await
    }

    async fn load(&self, id: Uuid) -> SagaResult<Changeset> {
        self.store.get(id).await?.ok_or(SagaError::NotFound {
            saga: Changeset::KIND,
            id,
        })
    }

    fn record_transition(&self, status: ChangesetStatus) {
        self.metrics
            .inc_saga_transition(Changeset::KIND, status.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DiscardReason;
    use crate::store::MemoryStore;
    use mediafleet_events::{LocalBus, MessageBus, RetryPolicy};
    use mediafleet_test_support::{media_item, mp3_item};
    use std::time::Duration;
    use tokio_stream::StreamExt;

    struct Harness {
        coordinator: ChangesetCoordinator,
        bus: Arc<LocalBus>,
        metrics: Metrics,
    }

    async fn harness() -> anyhow::Result<Harness> {
        let metrics = Metrics::new()?;
        let catalog = Arc::new(Catalog::new());
        catalog
            .replace_all(vec![
                mp3_item("n1", "c1", "first", "Blue", "Band"),
                media_item("n2", "c2", "second", "flac"),
            ])
            .await;
        let bus = Arc::new(LocalBus::new());
        let publisher = Publisher::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            RetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(5),
            },
            metrics.clone(),
        );
        let coordinator = ChangesetCoordinator::new(
            Arc::new(MemoryStore::<Changeset>::new()),
            catalog,
            publisher,
            metrics.clone(),
        );
        Ok(Harness {
            coordinator,
            bus,
            metrics,
        })
    }

    fn retitle(node_id: &str, media_id: &str) -> ChangeRequest {
        ChangeRequest {
            node_id: node_id.to_string(),
            media_id: media_id.to_string(),
            change: MediaChange {
                title: Some("Renamed".into()),
                ..MediaChange::default()
            },
        }
    }

    fn reply(id: Uuid, node_id: &str, success: bool, reason: Option<&str>) -> ChangesetNodeUpdate {
        ChangesetNodeUpdate {
            changeset_id: id,
            node_id: node_id.to_string(),
            success,
            failure_reason: reason.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn create_publishes_one_message_and_starts() -> anyhow::Result<()> {
        let harness = harness().await?;
        let mut stream = harness.bus.subscribe();

        let changeset = harness
            .coordinator
            .create(vec![retitle("n1", "c1"), retitle("n2", "c2")])
            .await?;
        assert_eq!(changeset.status, ChangesetStatus::InProgress);
        assert_eq!(changeset.outputs.len(), 2);

        let envelope = stream
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("stream ended"))??;
        let Message::ChangesetRequested(request) = envelope.message else {
            anyhow::bail!("unexpected message {:?}", envelope.message);
        };
        assert_eq!(request.changeset_id, changeset.id);
        assert_eq!(request.inputs.len(), 2);
        assert_eq!(
            harness.metrics.saga_transitions("changeset", "in_progress"),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_invalid_requests() -> anyhow::Result<()> {
        let harness = harness().await?;
        let _stream = harness.bus.subscribe();

        let empty = harness.coordinator.create(Vec::new()).await;
        assert!(matches!(empty, Err(SagaError::EmptyRequest { .. })));

        let unknown = harness.coordinator.create(vec![retitle("n1", "zz")]).await;
        assert!(matches!(unknown, Err(SagaError::UnknownMedia { .. })));

        let track_on_mp3 = ChangeRequest {
            node_id: "n1".into(),
            media_id: "c1".into(),
            change: MediaChange {
                track_number: Some(2),
                ..MediaChange::default()
            },
        };
        let noop = harness.coordinator.create(vec![track_on_mp3]).await;
        assert!(matches!(noop, Err(SagaError::EmptyChange { .. })));
        assert!(harness.coordinator.list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn publish_failure_fails_the_changeset() -> anyhow::Result<()> {
        let harness = harness().await?;
        // No subscriber: the channel never opens.
        let result = harness.coordinator.create(vec![retitle("n1", "c1")]).await;
        assert!(matches!(result, Err(SagaError::Publish { .. })));

        let stored = harness.coordinator.list().await?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ChangesetStatus::Failed);
        assert!(stored[0].failure_reason.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn completes_only_when_every_node_replied() -> anyhow::Result<()> {
        let harness = harness().await?;
        let _stream = harness.bus.subscribe();
        let changeset = harness
            .coordinator
            .create(vec![retitle("n1", "c1"), retitle("n2", "c2")])
            .await?;

        let first = harness
            .coordinator
            .apply_reply(&reply(changeset.id, "n1", true, None))
            .await?;
        assert_eq!(first, ReplyOutcome::Recorded);
        assert_eq!(
            harness.coordinator.get(changeset.id).await?.status,
            ChangesetStatus::InProgress
        );

        let duplicate = harness
            .coordinator
            .apply_reply(&reply(changeset.id, "n1", true, None))
            .await?;
        assert_eq!(
            duplicate,
            ReplyOutcome::Discarded(DiscardReason::AlreadyReplied)
        );

        harness
            .coordinator
            .apply_reply(&reply(changeset.id, "n2", true, None))
            .await?;
        assert_eq!(
            harness.coordinator.get(changeset.id).await?.status,
            ChangesetStatus::Complete
        );
        Ok(())
    }

    #[tokio::test]
    async fn late_reply_to_a_failed_changeset_keeps_no_lock() -> anyhow::Result<()> {
        let harness = harness().await?;
        let _stream = harness.bus.subscribe();
        let changeset = harness
            .coordinator
            .create(vec![retitle("n1", "c1"), retitle("n2", "c2")])
            .await?;

        let failed = harness
            .coordinator
            .apply_reply(&reply(changeset.id, "n1", false, Some("disk full")))
            .await?;
        assert_eq!(failed, ReplyOutcome::Failed);
        assert_eq!(harness.coordinator.locks.held(), 0);

        let late = harness
            .coordinator
            .apply_reply(&reply(changeset.id, "n2", true, None))
            .await?;
        assert_eq!(late, ReplyOutcome::Discarded(DiscardReason::Terminal));
        assert_eq!(harness.coordinator.locks.held(), 0);
        assert_eq!(
            harness.coordinator.get(changeset.id).await?.status,
            ChangesetStatus::Failed
        );
        Ok(())
    }

    #[tokio::test]
    async fn replies_to_unknown_changesets_are_errors() -> anyhow::Result<()> {
        let harness = harness().await?;
        let result = harness
            .coordinator
            .apply_reply(&reply(Uuid::new_v4(), "n1", true, None))
            .await;
        assert!(matches!(result, Err(SagaError::NotFound { .. })));
        Ok(())
    }
}
