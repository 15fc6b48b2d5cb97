//! Kafka batch producer.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, warn};

use crate::bus::{BusEntry, EventBus};
use crate::error::BusError;

/// [`EventBus`] over a Kafka cluster.
///
/// The producer runs idempotent with full acks, so retries inside the
/// client cannot reorder a partition. Delivery futures for a batch are
/// awaited together; the first failure fails the batch and the caller's
/// offset stays put (at-least-once).
pub struct KafkaEventBus {
    producer: FutureProducer,
}

impl std::fmt::Debug for KafkaEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventBus").finish_non_exhaustive()
    }
}

impl KafkaEventBus {
    /// Connects a producer to `bootstrap_servers`.
    ///
    /// # Errors
    ///
    /// [`BusError::Setup`] when the client cannot be constructed.
    pub fn new(bootstrap_servers: &str) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("message.timeout.ms", "120000")
            .create()
            .map_err(|e| BusError::Setup(e.to_string()))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(
        &self,
        topic: &str,
        entries: &[BusEntry],
        timeout: Duration,
    ) -> Result<(), BusError> {
        let deliveries = entries.iter().map(|entry| {
            self.producer.send(
                FutureRecord::to(topic).key(&entry.key).payload(&entry.value),
                Timeout::After(timeout),
            )
        });

        // First poll enqueues in entry order; then all deliveries are
        // awaited so the batch is all-or-nothing.
        let results = futures::future::join_all(deliveries).await;
        for result in results {
            if let Err((e, _message)) = result {
                warn!(topic, error = %e, "batch delivery failed");
                return Err(BusError::Publish {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
            }
        }
        debug!(topic, entries = entries.len(), "published batch");
        Ok(())
    }
}
