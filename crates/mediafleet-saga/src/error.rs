//! # Design
//!
//! - Validation variants are separate from infrastructure variants so the
//!   request layer can tell a bad request from a failed dependency.
//! - Messages are constant; ids, statuses, and paths travel as fields.

use std::path::PathBuf;

use mediafleet_download::DownloadError;
use mediafleet_events::BusError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for saga operations.
pub type SagaResult<T> = Result<T, SagaError>;

/// Errors raised by the saga coordinators and their stores.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request named no items.
    #[error("saga request is empty")]
    EmptyRequest {
        /// Saga kind being created.
        saga: &'static str,
    },
    /// The request referenced an item the catalog does not hold.
    #[error("media item not found")]
    UnknownMedia {
        /// Owning node named by the request.
        node_id: String,
        /// Media id named by the request.
        media_id: String,
    },
    /// A requested change would not edit anything.
    #[error("media change is empty")]
    EmptyChange {
        /// Media id whose change is empty.
        media_id: String,
    },
    /// No record exists for the id.
    #[error("saga record not found")]
    NotFound {
        /// Saga kind.
        saga: &'static str,
        /// Requested id.
        id: Uuid,
    },
    /// The record's status does not allow the operation.
    #[error("saga status does not allow operation")]
    InvalidStatus {
        /// Operation identifier.
        operation: &'static str,
        /// Record id.
        id: Uuid,
        /// Current status.
        status: String,
    },
    /// The transfer's archive is past its expiry.
    #[error("transfer has expired")]
    Expired {
        /// Transfer id.
        id: Uuid,
    },
    /// Publishing the saga's message failed.
    #[error("saga message publish failed")]
    Publish {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying bus error.
        source: BusError,
    },
    /// Gathering transfer content from the nodes failed.
    #[error("transfer content download failed")]
    Download {
        /// Transfer id.
        id: Uuid,
        /// Underlying download error.
        source: DownloadError,
    },
    /// Filesystem access failed.
    #[error("saga storage io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A stored record could not be encoded or decoded.
    #[error("saga record serialization failure")]
    Serde {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

impl SagaError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serde(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Self::Serde {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) const fn publish(operation: &'static str, source: BusError) -> Self {
        Self::Publish { operation, source }
    }

    /// Whether the error was caused by the caller's request rather than a
    /// failing dependency.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyRequest { .. }
                | Self::UnknownMedia { .. }
                | Self::EmptyChange { .. }
                | Self::NotFound { .. }
                | Self::InvalidStatus { .. }
                | Self::Expired { .. }
        )
    }
}
