//! Message bus error primitives.

use std::fmt::{self, Display, Formatter};

use crate::topics::Topic;

/// Errors raised while publishing or consuming messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No consumer is attached, so the transport cannot accept the message yet.
    ChannelClosed {
        /// Topic of the rejected message.
        topic: Topic,
    },
    /// Publishing kept failing after the configured number of attempts.
    RetriesExhausted {
        /// Topic of the abandoned message.
        topic: Topic,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// A consumer fell behind and messages were dropped.
    Lagged {
        /// Number of messages skipped.
        skipped: u64,
    },
    /// A handler was already registered for the topic.
    DuplicateHandler {
        /// Topic registered twice.
        topic: Topic,
    },
    /// A routing key did not match any known topic.
    UnknownTopic {
        /// Raw routing key.
        value: String,
    },
}

impl BusError {
    /// Whether the publish may succeed if attempted again later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. })
    }
}

impl Display for BusError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelClosed { .. } => formatter.write_str("message channel is not open"),
            Self::RetriesExhausted { .. } => {
                formatter.write_str("message publish retries exhausted")
            }
            Self::Lagged { .. } => formatter.write_str("message consumer lagged"),
            Self::DuplicateHandler { .. } => {
                formatter.write_str("message handler already registered")
            }
            Self::UnknownTopic { .. } => formatter.write_str("unknown message topic"),
        }
    }
}

impl std::error::Error for BusError {}

/// Result wrapper for bus operations.
pub type BusResult<T> = Result<T, BusError>;
