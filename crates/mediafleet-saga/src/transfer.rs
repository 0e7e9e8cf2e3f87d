//! Transfer coordinator.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use mediafleet_catalog::Catalog;
use mediafleet_download::{DownloadJob, DownloadQueue, DownloadSource};
use mediafleet_events::{
    MediaDelete, Message, Publisher, TransferNodeUpdate, TransferReady, TransferReadyUpdate,
    TransferRequested,
};
use mediafleet_nodes::NodeRegistry;
use mediafleet_telemetry::Metrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::ArchiveStore;
use crate::error::{SagaError, SagaResult};
use crate::locks::RecordLocks;
use crate::model::{ReplyOutcome, SagaRecord, Transfer, TransferStatus};
use crate::store::RecordStore;

/// Media to move and where to deliver it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Receiving node; the manager itself when absent.
    pub target_id: Option<String>,
    /// `(node_id, media_id)` pairs to retrieve.
    pub items: Vec<(String, String)>,
}

/// Collaborators of a [`TransferCoordinator`].
pub struct TransferDeps {
    /// Record persistence.
    pub store: Arc<dyn RecordStore<Transfer>>,
    /// Catalog used to validate requested items.
    pub catalog: Arc<Catalog>,
    /// Resolves node ids to addresses for the download.
    pub registry: Arc<dyn NodeRegistry>,
    /// Fan-out download queue.
    pub queue: DownloadQueue,
    /// Local archive storage.
    pub archives: ArchiveStore,
    /// Outbound messages.
    pub publisher: Publisher,
    /// Metrics handle.
    pub metrics: Metrics,
}

/// Creates transfers, applies node replies, and materializes the archive.
pub struct TransferCoordinator {
    deps: TransferDeps,
    self_id: String,
    lifetime: Duration,
    locks: RecordLocks,
}

impl TransferCoordinator {
    /// Wire a coordinator for the manager `self_id`. Transfers expire
    /// `lifetime` after creation.
    #[must_use]
    pub fn new(deps: TransferDeps, self_id: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            deps,
            self_id: self_id.into(),
            lifetime,
            locks: RecordLocks::default(),
        }
    }

    /// Manager node id used as the default target.
    #[must_use]
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Validate and record a transfer, then ask the input nodes to stage it.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty request or an item the catalog
    /// does not hold, and [`SagaError::Publish`] when the request could not
    /// be published, in which case the stored transfer is failed.
    pub async fn create(&self, request: TransferRequest) -> SagaResult<Transfer> {
        if request.items.is_empty() {
            return Err(SagaError::EmptyRequest {
                saga: Transfer::KIND,
            });
        }

        let mut inputs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (node_id, media_id) in request.items {
            if self.deps.catalog.find(&node_id, &media_id).await.is_none() {
                return Err(SagaError::UnknownMedia { node_id, media_id });
            }
            let ids = inputs.entry(node_id).or_default();
            if !ids.contains(&media_id) {
                ids.push(media_id);
            }
        }

        let target_id = request.target_id.unwrap_or_else(|| self.self_id.clone());
        let mut transfer = Transfer::new(target_id, inputs, self.lifetime);
        let _guard = self.locks.acquire(transfer.id).await;
        self.deps.store.save(&transfer).await?;
        self.record_transition(TransferStatus::Pending);

        let message = Message::TransferRequested(TransferRequested {
            transfer_id: transfer.id,
            target_id: transfer.target_id.clone(),
            inputs: transfer.inputs.clone(),
        });
        if let Err(err) = self.deps.publisher.publish(message).await {
            warn!(transfer_id = %transfer.id, error = %err, "transfer request not published");
            transfer.set_failed(err.to_string());
            self.deps.store.save(&transfer).await?;
            self.record_transition(TransferStatus::Failed);
            self.locks.release(transfer.id);
            return Err(SagaError::publish("transfer.create", err));
        }

        transfer.transition(TransferStatus::InProgress);
        self.deps.store.save(&transfer).await?;
        self.record_transition(TransferStatus::InProgress);
        info!(
            transfer_id = %transfer.id,
            target_id = %transfer.target_id,
            nodes = transfer.outputs.len(),
            "transfer started"
        );
        Ok(transfer)
    }

    /// Apply one node's reply. When the last node reports success the
    /// archive is assembled and stored or forwarded before returning.
    ///
    /// Failures while assembling or delivering the archive fail the transfer
    /// and are not returned as errors.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::NotFound`] for an unknown transfer, or a store
    /// error if the record cannot be read or saved.
    pub async fn apply_node_update(&self, update: &TransferNodeUpdate) -> SagaResult<ReplyOutcome> {
        let _guard = self.locks.acquire(update.transfer_id).await;
        let mut transfer = self.load(update.transfer_id).await?;
        let outcome = transfer.apply_reply(
            &update.node_id,
            update.success,
            update.failure_reason.clone(),
        );

        match outcome {
            ReplyOutcome::Discarded(reason) => {
                self.deps.metrics.inc_reply_discarded(Transfer::KIND);
                debug!(
                    transfer_id = %transfer.id,
                    node_id = %update.node_id,
                    reason = reason.as_str(),
                    status = %transfer.status,
                    "transfer reply discarded"
                );
            }
            ReplyOutcome::Recorded => self.deps.store.save(&transfer).await?,
            ReplyOutcome::Failed => {
                self.deps.store.save(&transfer).await?;
                self.record_transition(TransferStatus::Failed);
                warn!(
                    transfer_id = %transfer.id,
                    node_id = %update.node_id,
                    reason = transfer.failure_reason.as_deref().unwrap_or_default(),
                    "transfer failed"
                );
            }
            ReplyOutcome::AllNodesDone => {
                self.deps.store.save(&transfer).await?;
                self.record_transition(TransferStatus::ProcessingComplete);
                self.materialize(&mut transfer).await?;
            }
        }

        if transfer.status.is_terminal() {
            self.locks.release(transfer.id);
        }
        Ok(outcome)
    }

    /// Gather every node's staged content and deliver the merged archive.
    async fn materialize(&self, transfer: &mut Transfer) -> SagaResult<()> {
        info!(transfer_id = %transfer.id, "transfer processed; gathering content from nodes");

        let node_ids: Vec<String> = transfer.outputs.keys().cloned().collect();
        let mut jobs = Vec::with_capacity(node_ids.len());
        for node_id in &node_ids {
            match self.deps.registry.get_node(node_id).await {
                Ok(node) => jobs.push(DownloadJob {
                    node,
                    source: DownloadSource::Transfer(transfer.id),
                }),
                Err(err) => {
                    warn!(
                        transfer_id = %transfer.id,
                        node_id = %node_id,
                        error = %err,
                        "input node not resolvable"
                    );
                    let reason = format!("node {node_id} could not be resolved: {err}");
                    return self.fail(transfer, reason).await;
                }
            }
        }

        let content = match self.deps.queue.fetch(jobs).await {
            Ok(content) => content,
            Err(err) => {
                warn!(transfer_id = %transfer.id, error = %err, "transfer content download failed");
                return self.fail(transfer, err.reason()).await;
            }
        };

        if transfer.target_id == self.self_id {
            if let Err(err) = self.deps.archives.write(transfer.id, &content).await {
                warn!(transfer_id = %transfer.id, error = %err, "transfer archive not stored");
                return self.fail(transfer, "failed to store transfer archive").await;
            }
            transfer.transition(TransferStatus::Complete);
            self.deps.store.save(transfer).await?;
            self.record_transition(TransferStatus::Complete);
            info!(transfer_id = %transfer.id, expiry = %transfer.expiry, "transfer complete");
            return Ok(());
        }

        let message = Message::TransferReady(TransferReady {
            transfer_id: transfer.id,
            target_id: transfer.target_id.clone(),
            content,
        });
        match self.deps.publisher.publish(message).await {
            Ok(_) => {
                info!(
                    transfer_id = %transfer.id,
                    target_id = %transfer.target_id,
                    "transfer archive forwarded; awaiting receipt"
                );
                Ok(())
            }
            Err(err) => {
                warn!(transfer_id = %transfer.id, error = %err, "transfer archive not forwarded");
                self.fail(transfer, err.to_string()).await
            }
        }
    }

    async fn fail(&self, transfer: &mut Transfer, reason: impl Into<String>) -> SagaResult<()> {
        transfer.set_failed(reason);
        self.deps.store.save(transfer).await?;
        self.record_transition(TransferStatus::Failed);
        Ok(())
    }

    /// The target confirmed receipt of a forwarded archive: ask the input
    /// nodes to delete the transferred media and complete the transfer.
    ///
    /// The delete request is fire-and-forget; a publish failure is logged.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidStatus`] unless the transfer is
    /// `processing_complete`, [`SagaError::NotFound`] for an unknown id, or a
    /// store error.
    pub async fn apply_ready_update(&self, update: &TransferReadyUpdate) -> SagaResult<Transfer> {
        let _guard = self.locks.acquire(update.transfer_id).await;
        let mut transfer = self.load(update.transfer_id).await?;
        if transfer.status != TransferStatus::ProcessingComplete {
            self.deps.metrics.inc_reply_discarded(Transfer::KIND);
            if transfer.status.is_terminal() {
                self.locks.release(transfer.id);
            }
            return Err(SagaError::InvalidStatus {
                operation: "transfer.ready_update",
                id: transfer.id,
                status: transfer.status.to_string(),
            });
        }

        let message = Message::MediaDelete(MediaDelete {
            media_to_delete: transfer.inputs.clone(),
        });
        if let Err(err) = self.deps.publisher.publish(message).await {
            warn!(transfer_id = %transfer.id, error = %err, "source media delete not published");
        }

        transfer.transition(TransferStatus::Complete);
        self.deps.store.save(&transfer).await?;
        self.record_transition(TransferStatus::Complete);
        self.locks.release(transfer.id);
        info!(transfer_id = %transfer.id, "forwarded transfer complete");
        Ok(transfer)
    }

    /// Archive of a completed, unexpired transfer stored on this manager.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidStatus`] unless the transfer is complete,
    /// [`SagaError::Expired`] past its expiry, or an I/O error if the archive
    /// cannot be read.
    pub async fn download(&self, id: Uuid) -> SagaResult<Vec<u8>> {
        let transfer = self.load(id).await?;
        if transfer.status != TransferStatus::Complete {
            return Err(SagaError::InvalidStatus {
                operation: "transfer.download",
                id,
                status: transfer.status.to_string(),
            });
        }
        if transfer.is_expired_at(Utc::now()) {
            return Err(SagaError::Expired { id });
        }
        self.deps.archives.read(id).await
    }

    /// Remove the archive of every complete transfer whose expiry passed by
    /// `now` and mark it expired. Other statuses are left alone.
    ///
    /// Returns the ids that expired.
    ///
    /// # Errors
    ///
    /// Returns a store error if the records cannot be listed or saved.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SagaResult<Vec<Uuid>> {
        let candidates: Vec<Uuid> = self
            .deps
            .store
            .all()
            .await?
            .into_iter()
            .filter(|transfer| {
                transfer.status == TransferStatus::Complete && transfer.is_expired_at(now)
            })
            .map(|transfer| transfer.id)
            .collect();

        let mut expired = Vec::new();
        for id in candidates {
            let guard = self.locks.acquire(id).await;
            let swept = self.expire_one(id, now).await;
            drop(guard);
            self.locks.release(id);
            if swept? {
                expired.push(id);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired transfers swept");
        }
        Ok(expired)
    }

    async fn expire_one(&self, id: Uuid, now: DateTime<Utc>) -> SagaResult<bool> {
        let mut transfer = self.load(id).await?;
        if transfer.status != TransferStatus::Complete || !transfer.is_expired_at(now) {
            return Ok(false);
        }
        match self.deps.archives.delete(id).await {
            Ok(removed) => debug!(transfer_id = %id, removed, "transfer archive cleaned up"),
            Err(err) => {
                warn!(
                    transfer_id = %id,
                    error = %err,
                    "transfer archive cleanup failed; retrying next sweep"
                );
                return Ok(false);
            }
        }
        transfer.transition(TransferStatus::Expired);
        self.deps.store.save(&transfer).await?;
        self.record_transition(TransferStatus::Expired);
        Ok(true)
    }

    /// Fetch a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::NotFound`] if no transfer has the id.
    pub async fn get(&self, id: Uuid) -> SagaResult<Transfer> {
        self.load(id).await
    }

    /// Every transfer, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the records cannot be read.
    pub async fn list(&self) -> SagaResult<Vec<Transfer>> {
        self.deps.store.all().await
    }

    async fn load(&self, id: Uuid) -> SagaResult<Transfer> {
        self.deps.store.get(id).await?.ok_or(SagaError::NotFound {
            saga: Transfer::KIND,
            id,
        })
    }

    fn record_transition(&self, status: TransferStatus) {
        self.deps
            .metrics
            .inc_saga_transition(Transfer::KIND, status.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DiscardReason;
    use crate::store::MemoryStore;
    use mediafleet_events::{LocalBus, MessageBus, MessageStream, RetryPolicy};
    use mediafleet_nodes::NodeContentClient;
    use mediafleet_test_support::{
        FakeContentClient, FakeRegistry, archive_entries, media_item, node, zip_archive,
    };
    use tokio_stream::StreamExt;

    const MANAGER: &str = "manager-1";

    struct Harness {
        coordinator: TransferCoordinator,
        client: Arc<FakeContentClient>,
        stream: MessageStream,
        _temp: tempfile::TempDir,
    }

    async fn harness() -> anyhow::Result<Harness> {
        let metrics = Metrics::new()?;
        let catalog = Arc::new(Catalog::new());
        catalog
            .replace_all(vec![
                media_item("a", "m1", "one", "mp3"),
                media_item("b", "m2", "two", "mp3"),
            ])
            .await;
        let client = Arc::new(FakeContentClient::default());
        client
            .with_archive("a", zip_archive(&[("one.mp3", b"1")])?)
            .with_archive("b", zip_archive(&[("two.mp3", b"2")])?);
        let bus = Arc::new(LocalBus::new());
        let stream = bus.subscribe();
        let temp = tempfile::tempdir()?;
        let deps = TransferDeps {
            store: Arc::new(MemoryStore::<Transfer>::new()),
            catalog,
            registry: Arc::new(FakeRegistry::with_nodes([node("a"), node("b")])),
            queue: DownloadQueue::new(
                Arc::clone(&client) as Arc<dyn NodeContentClient>,
                metrics.clone(),
            ),
            archives: ArchiveStore::open(temp.path().join("downloads")).await?,
            publisher: Publisher::new(
                bus as Arc<dyn MessageBus>,
                RetryPolicy {
                    attempts: 1,
                    backoff: std::time::Duration::from_millis(1),
                },
                metrics.clone(),
            ),
            metrics,
        };
        Ok(Harness {
            coordinator: TransferCoordinator::new(deps, MANAGER, Duration::hours(24)),
            client,
            stream,
            _temp: temp,
        })
    }

    fn request(target_id: Option<&str>) -> TransferRequest {
        TransferRequest {
            target_id: target_id.map(str::to_string),
            items: vec![
                ("a".to_string(), "m1".to_string()),
                ("b".to_string(), "m2".to_string()),
            ],
        }
    }

    fn update(id: Uuid, node_id: &str, success: bool) -> TransferNodeUpdate {
        TransferNodeUpdate {
            transfer_id: id,
            node_id: node_id.to_string(),
            success,
            failure_reason: (!success).then(|| "staging failed".to_string()),
        }
    }

    async fn next_message(stream: &mut MessageStream) -> anyhow::Result<Message> {
        let envelope = stream
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("stream ended"))??;
        Ok(envelope.message)
    }

    #[tokio::test]
    async fn self_targeted_transfer_stores_merged_archive() -> anyhow::Result<()> {
        let mut harness = harness().await?;
        let transfer = harness.coordinator.create(request(None)).await?;
        assert_eq!(transfer.target_id, MANAGER);
        assert!(matches!(
            next_message(&mut harness.stream).await?,
            Message::TransferRequested(_)
        ));

        let unavailable = harness.coordinator.download(transfer.id).await;
        assert!(matches!(unavailable, Err(SagaError::InvalidStatus { .. })));

        harness
            .coordinator
            .apply_node_update(&update(transfer.id, "a", true))
            .await?;
        let last = harness
            .coordinator
            .apply_node_update(&update(transfer.id, "b", true))
            .await?;
        assert_eq!(last, ReplyOutcome::AllNodesDone);

        let stored = harness.coordinator.get(transfer.id).await?;
        assert_eq!(stored.status, TransferStatus::Complete);
        assert_eq!(harness.coordinator.locks.held(), 0);
        let entries = archive_entries(&harness.coordinator.download(transfer.id).await?)?;
        assert_eq!(entries.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn forwarded_transfer_completes_on_receipt() -> anyhow::Result<()> {
        let mut harness = harness().await?;
        let transfer = harness.coordinator.create(request(Some("c"))).await?;
        next_message(&mut harness.stream).await?;

        harness
            .coordinator
            .apply_node_update(&update(transfer.id, "a", true))
            .await?;
        harness
            .coordinator
            .apply_node_update(&update(transfer.id, "b", true))
            .await?;

        let Message::TransferReady(ready) = next_message(&mut harness.stream).await? else {
            anyhow::bail!("expected transfer.ready");
        };
        assert_eq!(ready.target_id, "c");
        assert_eq!(archive_entries(&ready.content)?.len(), 2);
        assert_eq!(
            harness.coordinator.get(transfer.id).await?.status,
            TransferStatus::ProcessingComplete
        );

        let done = harness
            .coordinator
            .apply_ready_update(&TransferReadyUpdate {
                transfer_id: transfer.id,
            })
            .await?;
        assert_eq!(done.status, TransferStatus::Complete);
        assert_eq!(harness.coordinator.locks.held(), 0);
        let Message::MediaDelete(delete) = next_message(&mut harness.stream).await? else {
            anyhow::bail!("expected media.delete");
        };
        assert_eq!(delete.media_to_delete, transfer.inputs);

        let again = harness
            .coordinator
            .apply_ready_update(&TransferReadyUpdate {
                transfer_id: transfer.id,
            })
            .await;
        assert!(matches!(again, Err(SagaError::InvalidStatus { .. })));

        let late = harness
            .coordinator
            .apply_node_update(&update(transfer.id, "a", true))
            .await?;
        assert_eq!(late, ReplyOutcome::Discarded(DiscardReason::Terminal));
        assert_eq!(harness.coordinator.locks.held(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn node_failure_fails_and_skips_download() -> anyhow::Result<()> {
        let harness = harness().await?;
        let transfer = harness.coordinator.create(request(None)).await?;

        harness
            .coordinator
            .apply_node_update(&update(transfer.id, "a", false))
            .await?;
        let late = harness
            .coordinator
            .apply_node_update(&update(transfer.id, "b", true))
            .await?;
        assert_eq!(late, ReplyOutcome::Discarded(DiscardReason::Terminal));

        let stored = harness.coordinator.get(transfer.id).await?;
        assert_eq!(stored.status, TransferStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("staging failed"));
        assert!(harness.client.download_calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn download_failure_fails_the_transfer() -> anyhow::Result<()> {
        let harness = harness().await?;
        harness.client.fail("b", "connection reset");
        let transfer = harness.coordinator.create(request(None)).await?;

        harness
            .coordinator
            .apply_node_update(&update(transfer.id, "a", true))
            .await?;
        harness
            .coordinator
            .apply_node_update(&update(transfer.id, "b", true))
            .await?;

        let stored = harness.coordinator.get(transfer.id).await?;
        assert_eq!(stored.status, TransferStatus::Failed);
        assert!(
            stored
                .failure_reason
                .as_deref()
                .is_some_and(|reason| reason.contains("node b"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn sweep_expires_only_complete_transfers() -> anyhow::Result<()> {
        let harness = harness().await?;
        let complete = harness.coordinator.create(request(None)).await?;
        harness
            .coordinator
            .apply_node_update(&update(complete.id, "a", true))
            .await?;
        harness
            .coordinator
            .apply_node_update(&update(complete.id, "b", true))
            .await?;
        let stuck = harness.coordinator.create(request(None)).await?;

        let early = harness.coordinator.sweep_expired(Utc::now()).await?;
        assert!(early.is_empty());

        let later = Utc::now() + Duration::hours(25);
        let swept = harness.coordinator.sweep_expired(later).await?;
        assert_eq!(swept, vec![complete.id]);
        assert_eq!(
            harness.coordinator.get(complete.id).await?.status,
            TransferStatus::Expired
        );
        assert_eq!(
            harness.coordinator.get(stuck.id).await?.status,
            TransferStatus::InProgress
        );
        assert!(matches!(
            harness.coordinator.download(complete.id).await,
            Err(SagaError::InvalidStatus { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_items_are_rejected() -> anyhow::Result<()> {
        let harness = harness().await?;
        let result = harness
            .coordinator
            .create(TransferRequest {
                target_id: None,
                items: vec![("a".to_string(), "missing".to_string())],
            })
            .await;
        assert!(matches!(result, Err(SagaError::UnknownMedia { .. })));
        assert!(harness.coordinator.list().await?.is_empty());
        Ok(())
    }
}
