//! Kafka offset queries for backlog metrics.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};

use rivulet_coordinator::backlog::{BusInspector, InspectorError};

use crate::error::BusError;

/// [`BusInspector`] over a Kafka cluster.
///
/// Queries are short metadata RPCs on a consumer that never subscribes;
/// the group id scopes the committed offsets being inspected.
pub struct KafkaBusInspector {
    consumer: BaseConsumer,
    timeout: Duration,
}

impl std::fmt::Debug for KafkaBusInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBusInspector")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KafkaBusInspector {
    /// Connects an inspector for `group_id`'s offsets.
    ///
    /// # Errors
    ///
    /// [`BusError::Setup`] when the client cannot be constructed.
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Result<Self, BusError> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| BusError::Setup(e.to_string()))?;
        Ok(Self {
            consumer,
            timeout: Duration::from_secs(10),
        })
    }

    fn wrap<T>(result: Result<T, rdkafka::error::KafkaError>) -> Result<T, InspectorError> {
        result.map_err(|e| InspectorError(e.to_string()))
    }
}

#[async_trait]
impl BusInspector for KafkaBusInspector {
    async fn assigned_partitions(&self, topic: &str) -> Result<Vec<i32>, InspectorError> {
        let assignment = Self::wrap(self.consumer.assignment())?;
        Ok(assignment
            .elements()
            .iter()
            .filter(|elem| elem.topic() == topic)
            .map(|elem| elem.partition())
            .collect())
    }

    async fn all_partitions(&self, topic: &str) -> Result<Vec<i32>, InspectorError> {
        let metadata = Self::wrap(self.consumer.fetch_metadata(Some(topic), self.timeout))?;
        Ok(metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| t.partitions().iter().map(|p| p.id()).collect())
            .unwrap_or_default())
    }

    async fn high_watermark(&self, topic: &str, partition: i32) -> Result<i64, InspectorError> {
        let (_low, high) =
            Self::wrap(self.consumer.fetch_watermarks(topic, partition, self.timeout))?;
        Ok(high)
    }

    async fn committed_offset(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, InspectorError> {
        let mut requested = TopicPartitionList::new();
        requested
            .add_partition_offset(topic, partition, Offset::Invalid)
            .map_err(|e| InspectorError(e.to_string()))?;
        let committed = Self::wrap(self.consumer.committed_offsets(requested, self.timeout))?;
        Ok(committed.elements().iter().find_map(|elem| {
            match (elem.topic() == topic && elem.partition() == partition, elem.offset()) {
                (true, Offset::Offset(offset)) => Some(offset),
                _ => None,
            }
        }))
    }
}
