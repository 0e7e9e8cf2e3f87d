//! # Design
//!
//! - Separate "node not known" from transport failures so callers can map the
//!   former to a client error.
//! - Keep messages constant; URLs, ids, and statuses travel as fields.

use thiserror::Error;

/// Result alias for registry and node client operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors raised while talking to the registry or to a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The request could not be sent or the response body could not be read.
    #[error("node http request failed")]
    Http {
        /// Operation identifier.
        operation: &'static str,
        /// Request URL.
        url: String,
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// The peer answered with a non-success status.
    #[error("node http response status error")]
    HttpStatus {
        /// Operation identifier.
        operation: &'static str,
        /// Request URL.
        url: String,
        /// Returned status code.
        status: u16,
    },
    /// The response body did not match the expected shape.
    #[error("node response could not be decoded")]
    Decode {
        /// Operation identifier.
        operation: &'static str,
        /// Request URL.
        url: String,
        /// Underlying decode error.
        source: reqwest::Error,
    },
    /// The registry does not know the node.
    #[error("node not found")]
    NotFound {
        /// Requested node id.
        node_id: String,
    },
    /// The node could not be reached.
    #[error("node unreachable")]
    Unreachable {
        /// Target node id.
        node_id: String,
        /// Human-readable cause.
        reason: String,
    },
}

impl NodeError {
    pub(crate) const fn http(operation: &'static str, url: String, source: reqwest::Error) -> Self {
        Self::Http {
            operation,
            url,
            source,
        }
    }

    pub(crate) const fn status(operation: &'static str, url: String, status: u16) -> Self {
        Self::HttpStatus {
            operation,
            url,
            status,
        }
    }

    pub(crate) const fn decode(
        operation: &'static str,
        url: String,
        source: reqwest::Error,
    ) -> Self {
        Self::Decode {
            operation,
            url,
            source,
        }
    }

    /// Whether the error means the registry has no such node.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
