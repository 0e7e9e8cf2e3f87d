//! # Design
//!
//! - Centralize application-level errors for bootstrap and request handling.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: mediafleet_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: mediafleet_telemetry::TelemetryError,
    },
    /// Registry or node host operations failed.
    #[error("node operation failed")]
    Node {
        /// Operation identifier.
        operation: &'static str,
        /// Source node error.
        source: mediafleet_nodes::NodeError,
    },
    /// Catalog queries were rejected.
    #[error("catalog query rejected")]
    Catalog {
        /// Operation identifier.
        operation: &'static str,
        /// Source catalog error.
        source: mediafleet_catalog::CatalogError,
    },
    /// Fan-out downloads failed.
    #[error("download failed")]
    Download {
        /// Operation identifier.
        operation: &'static str,
        /// Source download error.
        source: mediafleet_download::DownloadError,
    },
    /// Saga operations failed.
    #[error("saga operation failed")]
    Saga {
        /// Operation identifier.
        operation: &'static str,
        /// Source saga error.
        source: mediafleet_saga::SagaError,
    },
    /// Message bus operations failed.
    #[error("message bus operation failed")]
    Bus {
        /// Operation identifier.
        operation: &'static str,
        /// Source bus error.
        source: mediafleet_events::BusError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// A request named a node that is currently down.
    #[error("node is down")]
    NodeDown {
        /// Node that was requested.
        node_id: String,
    },
    /// A request referenced media the catalog does not hold.
    #[error("unknown media item")]
    UnknownMedia {
        /// Owning node named by the request.
        node_id: String,
        /// Media id named by the request.
        media_id: String,
    },
    /// A request carried no items.
    #[error("request is empty")]
    EmptyRequest {
        /// Operation identifier.
        operation: &'static str,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: mediafleet_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: mediafleet_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn node(operation: &'static str, source: mediafleet_nodes::NodeError) -> Self {
        Self::Node { operation, source }
    }

    pub(crate) const fn catalog(
        operation: &'static str,
        source: mediafleet_catalog::CatalogError,
    ) -> Self {
        Self::Catalog { operation, source }
    }

    pub(crate) const fn download(
        operation: &'static str,
        source: mediafleet_download::DownloadError,
    ) -> Self {
        Self::Download { operation, source }
    }

    pub(crate) const fn saga(operation: &'static str, source: mediafleet_saga::SagaError) -> Self {
        Self::Saga { operation, source }
    }

    pub(crate) const fn bus(operation: &'static str, source: mediafleet_events::BusError) -> Self {
        Self::Bus { operation, source }
    }

    pub(crate) const fn io(
        operation: &'static str,
        path: Option<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }

    /// Whether the caller sent a request that can never succeed as given.
    ///
    /// Validation errors map to client errors; everything else is an
    /// infrastructure failure.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        match self {
            Self::NodeDown { .. }
            | Self::UnknownMedia { .. }
            | Self::EmptyRequest { .. }
            | Self::Catalog { .. } => true,
            Self::Saga { source, .. } => source.is_validation(),
            Self::Node { source, .. } => source.is_not_found(),
            Self::Download { source, .. } => {
                matches!(source, mediafleet_download::DownloadError::Empty)
            }
            Self::Config { .. } | Self::Telemetry { .. } | Self::Bus { .. } | Self::Io { .. } => {
                false
            }
        }
    }
}
