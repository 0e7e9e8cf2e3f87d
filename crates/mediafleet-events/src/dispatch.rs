//! Consumer-side dispatch: handlers are registered explicitly before the
//! consumption loop starts, and every delivery runs on its own task so a slow
//! handler never blocks the loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mediafleet_telemetry::Metrics;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;
use crate::error::{BusError, BusResult};
use crate::payloads::MessageEnvelope;
use crate::topics::Topic;

/// Reacts to deliveries on one topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a single delivery.
    async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()>;
}

/// Topic-to-handler table assembled during startup.
pub struct ConsumerRegistry {
    handlers: HashMap<Topic, Arc<dyn MessageHandler>>,
    metrics: Metrics,
}

impl ConsumerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(metrics: Metrics) -> Self {
        Self {
            handlers: HashMap::new(),
            metrics,
        }
    }

    /// Register the handler for a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateHandler`] if the topic already has a handler.
    pub fn register(
        &mut self,
        topic: Topic,
        handler: Arc<dyn MessageHandler>,
    ) -> BusResult<&mut Self> {
        if self.handlers.contains_key(&topic) {
            return Err(BusError::DuplicateHandler { topic });
        }
        self.handlers.insert(topic, handler);
        Ok(self)
    }

    /// Topics with a registered handler, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.handlers.keys().copied().collect();
        topics.sort();
        topics
    }

    /// Attach to the bus and start consuming.
    ///
    /// The subscription is taken before this returns, so anything published
    /// afterwards reaches the registered handlers.
    #[must_use]
    pub fn spawn(self, bus: &dyn MessageBus) -> JoinHandle<()> {
        let mut stream = bus.subscribe();
        let handlers = self.handlers;
        let metrics = self.metrics;
        info!(topics = handlers.len(), "message consumer started");
        tokio::spawn(async move {
            while let Some(delivery) = stream.next().await {
                let envelope = match delivery {
                    Ok(envelope) => envelope,
                    Err(BusError::Lagged { skipped }) => {
                        warn!(skipped, "message consumer lagged; deliveries were dropped");
                        continue;
                    }
                    Err(err) => {
                        warn!(error = %err, "message delivery failed");
                        continue;
                    }
                };

                let topic = envelope.message.topic();
                let Some(handler) = handlers.get(&topic).cloned() else {
                    debug!(topic = %topic, message_id = envelope.id, "no handler for topic");
                    continue;
                };

                metrics.inc_message_consumed(topic.as_str());
                tokio::spawn(async move {
                    let message_id = envelope.id;
                    if let Err(err) = handler.handle(envelope).await {
                        error!(
                            error = %format!("{err:#}"),
                            topic = %topic,
                            message_id,
                            "message handler failed"
                        );
                    }
                });
            }
            info!("message consumer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::payloads::{Message, NodeMediaChanged, NodeReady};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forwarding {
        sender: mpsc::UnboundedSender<MessageEnvelope>,
    }

    #[async_trait]
    impl MessageHandler for Forwarding {
        async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()> {
            self.sender.send(envelope)?;
            Ok(())
        }
    }

    struct Stalling;

    #[async_trait]
    impl MessageHandler for Stalling {
        async fn handle(&self, _envelope: MessageEnvelope) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() -> anyhow::Result<()> {
        let (sender, _receiver) = mpsc::unbounded_channel();
        let handler: Arc<dyn MessageHandler> = Arc::new(Forwarding { sender });
        let mut registry = ConsumerRegistry::new(Metrics::new()?);
        registry.register(Topic::NodeReady, Arc::clone(&handler))?;

        let err = registry.register(Topic::NodeReady, handler).err();
        assert_eq!(
            err,
            Some(BusError::DuplicateHandler {
                topic: Topic::NodeReady
            })
        );
        assert_eq!(registry.topics(), vec![Topic::NodeReady]);
        Ok(())
    }

    #[tokio::test]
    async fn routes_by_topic_and_does_not_block_on_slow_handlers() -> anyhow::Result<()> {
        let bus = LocalBus::new();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut registry = ConsumerRegistry::new(Metrics::new()?);
        registry
            .register(Topic::NodeReady, Arc::new(Stalling))?
            .register(Topic::NodeMediaChanged, Arc::new(Forwarding { sender }))?;
        let consumer = registry.spawn(&bus);

        bus.publish(Message::NodeReady(NodeReady {
            node_id: "n1".into(),
            node_name: "host-one".into(),
        }))
        .await?;
        bus.publish(Message::NodeMediaChanged(NodeMediaChanged {
            node_id: "n2".into(),
        }))
        .await?;

        let delivered = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("handler channel closed"))?;
        assert_eq!(delivered.message.topic(), Topic::NodeMediaChanged);

        consumer.abort();
        Ok(())
    }
}
