//! Outbound publishing with a bounded retry for transports that are not yet open.

use std::sync::Arc;
use std::time::Duration;

use mediafleet_telemetry::Metrics;
use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::error::{BusError, BusResult};
use crate::payloads::{Message, MessageId};

/// Default number of publish attempts before giving up.
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 5;
/// Default delay between publish attempts.
pub const DEFAULT_PUBLISH_BACKOFF: Duration = Duration::from_secs(1);

/// Retry policy applied to outbound publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_PUBLISH_ATTEMPTS,
            backoff: DEFAULT_PUBLISH_BACKOFF,
        }
    }
}

/// Publishing handle shared by every component that emits messages.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    policy: RetryPolicy,
    metrics: Metrics,
}

impl Publisher {
    /// Wrap a transport with the supplied retry policy.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, policy: RetryPolicy, metrics: Metrics) -> Self {
        Self {
            bus,
            policy,
            metrics,
        }
    }

    /// Underlying transport.
    #[must_use]
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Publish a message, retrying only while the channel is not open.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::RetriesExhausted`] when every attempt found the
    /// channel closed, or the transport error when it is not retryable.
    pub async fn publish(&self, message: Message) -> BusResult<MessageId> {
        let topic = message.topic();
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.bus.publish(message.clone()).await {
                Ok(id) => {
                    self.metrics.inc_message_published(topic.as_str());
                    debug!(topic = %topic, message_id = id, "message published");
                    return Ok(id);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    self.metrics.inc_publish_retry();
                    warn!(
                        topic = %topic,
                        attempt,
                        "message channel not open; retrying publish"
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    warn!(topic = %topic, attempts, "giving up on message publish");
                    return Err(BusError::RetriesExhausted { topic, attempts });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::payloads::MediaDelete;
    use crate::topics::Topic;
    use std::collections::BTreeMap;
    use tokio_stream::StreamExt;

    fn delete_message() -> Message {
        Message::MediaDelete(MediaDelete {
            media_to_delete: BTreeMap::from([("n1".to_string(), vec!["m1".to_string()])]),
        })
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        let publisher = Publisher::new(Arc::new(LocalBus::new()), fast_policy(3), metrics.clone());

        let err = publisher.publish(delete_message()).await.err();
        assert_eq!(
            err,
            Some(BusError::RetriesExhausted {
                topic: Topic::MediaDelete,
                attempts: 3
            })
        );
        assert_eq!(metrics.snapshot().bus_publish_retries_total, 2);
        Ok(())
    }

    #[tokio::test]
    async fn succeeds_once_a_consumer_attaches() -> anyhow::Result<()> {
        let bus = LocalBus::new();
        let publisher = Publisher::new(
            Arc::new(bus.clone()),
            RetryPolicy {
                attempts: 20,
                backoff: Duration::from_millis(20),
            },
            Metrics::new()?,
        );

        let late_consumer = tokio::spawn({
            let bus = bus.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let mut stream = bus.subscribe();
                stream.next().await
            }
        });

        let id = publisher.publish(delete_message()).await?;
        assert_eq!(id, 1);
        let delivered = late_consumer.await?;
        assert!(matches!(delivered, Some(Ok(envelope)) if envelope.message == delete_message()));
        Ok(())
    }
}
