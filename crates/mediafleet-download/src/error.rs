//! # Design
//!
//! - A failed fan-out reports every node that failed before cancellation
//!   landed, keeping each node's error as a source.
//! - Archive errors name the contributing node when one is known.

use std::error::Error as _;
use std::fmt::{self, Display, Formatter};

use mediafleet_nodes::NodeError;
use thiserror::Error;

/// Result alias for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// One node's contribution that failed.
#[derive(Debug)]
pub struct NodeFailure {
    /// Node the fetch targeted.
    pub node_id: String,
    /// Error returned by the node client.
    pub error: NodeError,
}

impl Display for NodeFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "node {}: {}", self.node_id, self.error)?;
        let mut source = self.error.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}

/// Errors raised by the download queue.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Nothing was requested.
    #[error("download request is empty")]
    Empty,
    /// At least one node fetch failed; the remaining fetches were cancelled.
    #[error("download failed on one or more nodes")]
    NodeFailures {
        /// Failures observed before the fan-out stopped.
        failures: Vec<NodeFailure>,
    },
    /// A fetch task ended abnormally.
    #[error("download task failed")]
    Task {
        /// Underlying join error.
        source: tokio::task::JoinError,
    },
    /// A node archive could not be read or the merged archive written.
    #[error("archive merge failed")]
    Archive {
        /// Operation identifier.
        operation: &'static str,
        /// Node whose archive was being read, if any.
        node_id: Option<String>,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// Copying an archive entry failed.
    #[error("archive entry copy failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Node whose archive was being read.
        node_id: Option<String>,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl DownloadError {
    pub(crate) fn archive(
        operation: &'static str,
        node_id: Option<&str>,
        source: zip::result::ZipError,
    ) -> Self {
        Self::Archive {
            operation,
            node_id: node_id.map(str::to_string),
            source,
        }
    }

    pub(crate) fn io(operation: &'static str, node_id: Option<&str>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            node_id: node_id.map(str::to_string),
            source,
        }
    }

    /// Human-readable reason suitable for a saga's `failure_reason`.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::NodeFailures { failures } => failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
            other => {
                let mut text = other.to_string();
                let mut source = other.source();
                while let Some(cause) = source {
                    text.push_str(": ");
                    text.push_str(&cause.to_string());
                    source = cause.source();
                }
                text
            }
        }
    }

    /// Node ids that failed, empty for non-node errors.
    #[must_use]
    pub fn failed_nodes(&self) -> Vec<&str> {
        match self {
            Self::NodeFailures { failures } => {
                failures.iter().map(|failure| failure.node_id.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}
