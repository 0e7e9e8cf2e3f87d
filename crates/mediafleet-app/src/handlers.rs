//! Message handlers for the topics the manager consumes.
//!
//! Handlers are registered explicitly at startup. A handler failure is
//! returned to the dispatcher, which logs it; the saga or catalog is left in
//! its last persisted state and nothing is retried.

use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use mediafleet_events::{
    BusResult, ConsumerRegistry, Message, MessageEnvelope, MessageHandler, Topic,
};
use mediafleet_nodes::ConnectivityWatcher;
use mediafleet_saga::{ChangesetCoordinator, ReplyOutcome, TransferCoordinator};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::sync::SyncCoordinator;

/// `node.ready`: (re)start watching the node, then refresh its rows.
///
/// The watch starts first so a node whose listing fails is still pruned when
/// it later leaves the registry.
pub struct NodeReadyHandler {
    sync: Arc<SyncCoordinator>,
    watcher: ConnectivityWatcher,
}

#[async_trait]
impl MessageHandler for NodeReadyHandler {
    async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()> {
        let Message::NodeReady(ready) = envelope.message else {
            bail!("unexpected message on {}", Topic::NodeReady);
        };
        if self.watcher.watch(&ready.node_id, &ready.node_name).await {
            info!(node_id = %ready.node_id, node_name = %ready.node_name, "watching node");
        }
        self.sync
            .sync_node(&ready.node_id)
            .await
            .with_context(|| format!("syncing ready node {}", ready.node_id))?;
        Ok(())
    }
}

/// `node.media_changed`: re-fetch the node's listing.
pub struct NodeMediaChangedHandler {
    sync: Arc<SyncCoordinator>,
}

#[async_trait]
impl MessageHandler for NodeMediaChangedHandler {
    async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()> {
        let Message::NodeMediaChanged(changed) = envelope.message else {
            bail!("unexpected message on {}", Topic::NodeMediaChanged);
        };
        self.sync
            .sync_node(&changed.node_id)
            .await
            .with_context(|| format!("syncing changed node {}", changed.node_id))?;
        Ok(())
    }
}

/// `transfer.node_update`: apply a node's staging reply.
pub struct TransferNodeUpdateHandler {
    transfers: Arc<TransferCoordinator>,
}

#[async_trait]
impl MessageHandler for TransferNodeUpdateHandler {
    async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()> {
        let Message::TransferNodeUpdate(update) = envelope.message else {
            bail!("unexpected message on {}", Topic::TransferNodeUpdate);
        };
        let outcome = self
            .transfers
            .apply_node_update(&update)
            .await
            .with_context(|| format!("applying reply to transfer {}", update.transfer_id))?;
        log_outcome("transfer", &update.node_id, outcome);
        Ok(())
    }
}

/// `transfer.ready_update`: the target confirmed a forwarded archive.
pub struct TransferReadyUpdateHandler {
    transfers: Arc<TransferCoordinator>,
}

#[async_trait]
impl MessageHandler for TransferReadyUpdateHandler {
    async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()> {
        let Message::TransferReadyUpdate(update) = envelope.message else {
            bail!("unexpected message on {}", Topic::TransferReadyUpdate);
        };
        self.transfers
            .apply_ready_update(&update)
            .await
            .with_context(|| format!("confirming receipt of transfer {}", update.transfer_id))?;
        Ok(())
    }
}

/// `changeset.node_update`: apply a node's edit reply.
pub struct ChangesetNodeUpdateHandler {
    changesets: Arc<ChangesetCoordinator>,
}

#[async_trait]
impl MessageHandler for ChangesetNodeUpdateHandler {
    async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()> {
        let Message::ChangesetNodeUpdate(update) = envelope.message else {
            bail!("unexpected message on {}", Topic::ChangesetNodeUpdate);
        };
        let outcome = self
            .changesets
            .apply_reply(&update)
            .await
            .with_context(|| format!("applying reply to changeset {}", update.changeset_id))?;
        log_outcome("changeset", &update.node_id, outcome);
        Ok(())
    }
}

fn log_outcome(saga: &'static str, node_id: &str, outcome: ReplyOutcome) {
    match outcome {
        ReplyOutcome::Discarded(reason) => {
            debug!(saga, node_id = %node_id, reason = reason.as_str(), "reply discarded");
        }
        outcome => debug!(saga, node_id = %node_id, outcome = ?outcome, "reply applied"),
    }
}

/// Services the handlers act on.
pub struct HandlerContext {
    /// Catalog reconciliation.
    pub sync: Arc<SyncCoordinator>,
    /// Node liveness watches.
    pub watcher: ConnectivityWatcher,
    /// Transfer saga.
    pub transfers: Arc<TransferCoordinator>,
    /// Changeset saga.
    pub changesets: Arc<ChangesetCoordinator>,
}

/// Register one handler per consumed topic.
///
/// # Errors
///
/// Returns [`AppError::Bus`] if a topic already has a handler.
pub fn register_handlers(
    consumers: &mut ConsumerRegistry,
    context: &HandlerContext,
) -> AppResult<()> {
    register_all(consumers, context).map_err(|err| AppError::bus("consumers.register", err))
}

fn register_all(consumers: &mut ConsumerRegistry, context: &HandlerContext) -> BusResult<()> {
    consumers
        .register(
            Topic::NodeReady,
            Arc::new(NodeReadyHandler {
                sync: Arc::clone(&context.sync),
                watcher: context.watcher.clone(),
            }),
        )?
        .register(
            Topic::NodeMediaChanged,
            Arc::new(NodeMediaChangedHandler {
                sync: Arc::clone(&context.sync),
            }),
        )?
        .register(
            Topic::TransferNodeUpdate,
            Arc::new(TransferNodeUpdateHandler {
                transfers: Arc::clone(&context.transfers),
            }),
        )?
        .register(
            Topic::TransferReadyUpdate,
            Arc::new(TransferReadyUpdateHandler {
                transfers: Arc::clone(&context.transfers),
            }),
        )?
        .register(
            Topic::ChangesetNodeUpdate,
            Arc::new(ChangesetNodeUpdateHandler {
                changesets: Arc::clone(&context.changesets),
            }),
        )?;
    Ok(())
}
