//! Concurrent per-node fetch with first-error cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;

use mediafleet_nodes::{NodeConfig, NodeContentClient, NodeError};
use mediafleet_telemetry::Metrics;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DownloadError, DownloadResult, NodeFailure};
use crate::merge::merge_archives;

/// What to fetch from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// Archive of the listed media ids.
    Media(Vec<String>),
    /// Archive the node staged for a transfer.
    Transfer(Uuid),
}

/// One node's share of a fan-out download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// Node to fetch from.
    pub node: NodeConfig,
    /// What to fetch.
    pub source: DownloadSource,
}

/// Group `(node, media_id)` pairs into one media job per distinct node,
/// ordered by node id. Duplicate ids for a node are fetched once.
#[must_use]
pub fn media_jobs(pairs: impl IntoIterator<Item = (NodeConfig, String)>) -> Vec<DownloadJob> {
    let mut grouped: BTreeMap<String, (NodeConfig, Vec<String>)> = BTreeMap::new();
    for (node, media_id) in pairs {
        let (_, ids) = grouped
            .entry(node.id.clone())
            .or_insert_with(|| (node, Vec::new()));
        if !ids.contains(&media_id) {
            ids.push(media_id);
        }
    }
    grouped
        .into_values()
        .map(|(node, ids)| DownloadJob {
            node,
            source: DownloadSource::Media(ids),
        })
        .collect()
}

enum FetchOutcome {
    Fetched(Vec<u8>),
    Failed(NodeError),
    Cancelled,
}

/// Runs one fetch task per node and merges the results.
#[derive(Clone)]
pub struct DownloadQueue {
    client: Arc<dyn NodeContentClient>,
    metrics: Metrics,
}

impl DownloadQueue {
    /// Build a queue fetching through `client`.
    #[must_use]
    pub fn new(client: Arc<dyn NodeContentClient>, metrics: Metrics) -> Self {
        Self { client, metrics }
    }

    /// Fetch every job concurrently and return the final archive.
    ///
    /// Jobs for the same node are expected to be grouped beforehand; when a
    /// node appears twice the later job's bytes win. The first failing fetch
    /// cancels the others. A fetch already past its network call still
    /// finishes, but its result is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Empty`] for no jobs,
    /// [`DownloadError::NodeFailures`] when any node fetch fails, or an
    /// archive error if the contributions cannot be merged.
    pub async fn fetch(&self, jobs: Vec<DownloadJob>) -> DownloadResult<Vec<u8>> {
        if jobs.is_empty() {
            return Err(DownloadError::Empty);
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for job in jobs {
            let client = Arc::clone(&self.client);
            let token = cancel.child_token();
            tasks.spawn(async move {
                let node_id = job.node.id.clone();
                let outcome = tokio::select! {
                    () = token.cancelled() => FetchOutcome::Cancelled,
                    result = fetch_one(client.as_ref(), &job) => match result {
                        Ok(bytes) => FetchOutcome::Fetched(bytes),
                        Err(err) => FetchOutcome::Failed(err),
                    },
                };
                (node_id, outcome)
            });
        }

        let mut parts = BTreeMap::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((node_id, FetchOutcome::Fetched(bytes))) => {
                    if cancel.is_cancelled() {
                        debug!(node_id = %node_id, "dropping fetch finished after cancellation");
                    } else {
                        debug!(node_id = %node_id, bytes = bytes.len(), "node fetch complete");
                        parts.insert(node_id, bytes);
                    }
                }
                Ok((node_id, FetchOutcome::Failed(error))) => {
                    warn!(node_id = %node_id, error = %error, "node fetch failed; cancelling fan-out");
                    cancel.cancel();
                    failures.push(NodeFailure { node_id, error });
                }
                Ok((node_id, FetchOutcome::Cancelled)) => {
                    debug!(node_id = %node_id, "node fetch cancelled");
                }
                Err(source) => {
                    cancel.cancel();
                    tasks.abort_all();
                    self.metrics.inc_download_failure();
                    return Err(DownloadError::Task { source });
                }
            }
        }

        if !failures.is_empty() {
            self.metrics.inc_download_failure();
            return Err(DownloadError::NodeFailures { failures });
        }

        info!(nodes = parts.len(), "fan-out download complete");
        merge_archives(parts)
    }
}

async fn fetch_one(client: &dyn NodeContentClient, job: &DownloadJob) -> Result<Vec<u8>, NodeError> {
    match &job.source {
        DownloadSource::Media(ids) => client.download_media(&job.node, ids).await,
        DownloadSource::Transfer(transfer_id) => {
            client.download_transfer(&job.node, *transfer_id).await
        }
    }
}
