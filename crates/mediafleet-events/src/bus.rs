//! Transport seam and the in-process broadcast bus.
//!
//! The in-process bus uses `tokio::broadcast` with a bounded buffer; a consumer
//! that falls behind observes a lag error and resumes from the oldest retained
//! message. Publishing while no consumer is attached is reported as a closed
//! channel so callers can retry once consumers come up.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use crate::error::{BusError, BusResult};
use crate::payloads::{Message, MessageEnvelope, MessageId};

/// Default buffer size for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1_024;

/// Stream of deliveries for a single consumer.
pub type MessageStream = Pin<Box<dyn Stream<Item = BusResult<MessageEnvelope>> + Send>>;

/// Publish/consume primitives offered by a message transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message, returning the identifier assigned by the transport.
    async fn publish(&self, message: Message) -> BusResult<MessageId>;

    /// Attach a new consumer. Messages published after this call are delivered.
    fn subscribe(&self) -> MessageStream;
}

/// In-process bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct LocalBus {
    sender: Sender<MessageEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl LocalBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "message bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a bus with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Number of consumers currently attached.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, message: Message) -> BusResult<MessageId> {
        let topic = message.topic();
        if self.sender.receiver_count() == 0 {
            return Err(BusError::ChannelClosed { topic });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = MessageEnvelope {
            id,
            timestamp: Utc::now(),
            message,
        };
        self.sender
            .send(envelope)
            .map_err(|_| BusError::ChannelClosed { topic })?;
        Ok(id)
    }

    fn subscribe(&self) -> MessageStream {
        let stream = BroadcastStream::new(self.sender.subscribe()).map(|item| {
            item.map_err(|BroadcastStreamRecvError::Lagged(skipped)| BusError::Lagged { skipped })
        });
        Box::pin(stream)
    }
}
