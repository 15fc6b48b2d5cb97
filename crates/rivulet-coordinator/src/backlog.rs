//! Consumer backlog bookkeeping against the message bus.
//!
//! For each (topic, partition) the Coordinator tracks the published
//! high-watermark, per-group consumer offsets, and named watermark
//! snapshots:
//!
//! ```text
//! <root>/<topic>/topic/<partition>                integer
//! <root>/<topic>/consumers/<partition>/<group>    integer
//! <root>/<topic>/snapshots/<partition>/<name>     integer
//! ```
//!
//! The topic offset is always written before the consumer offset, so a
//! reader never observes a consumer offset newer than its topic offset.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::error::{BacklogError, CoordinatorError};
use crate::store::Coordinator;

/// A bus offset query failed.
#[derive(Debug, Error)]
#[error("bus offset query: {0}")]
pub struct InspectorError(
    /// Reason reported by the bus client.
    pub String,
);

/// Read-side view of the message bus: partition assignment, watermarks,
/// and committed group offsets.
#[async_trait]
pub trait BusInspector: Send + Sync {
    /// Partitions of `topic` currently assigned to this consumer.
    async fn assigned_partitions(&self, topic: &str) -> Result<Vec<i32>, InspectorError>;

    /// All partitions of `topic`.
    async fn all_partitions(&self, topic: &str) -> Result<Vec<i32>, InspectorError>;

    /// Last published offset of a partition.
    async fn high_watermark(&self, topic: &str, partition: i32) -> Result<i64, InspectorError>;

    /// This consumer's committed offset on a partition, if any.
    async fn committed_offset(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, InspectorError>;
}

/// One partition's recorded backlog pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionBacklog {
    /// Partition number.
    pub partition: i32,
    /// Published high-watermark at record time.
    pub topic_offset: i64,
    /// Consumer's committed offset, when one existed.
    pub consumer_offset: Option<i64>,
}

/// A partition failing a lag or progress check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerLag {
    /// Partition number.
    pub partition: i32,
    /// Consumer group the lag belongs to.
    pub group: String,
    /// Messages between the reference offset and the consumer offset.
    pub lag: i64,
}

/// Backlog metrics for one message bus, rooted on the Coordinator.
pub struct BacklogMetrics {
    coordinator: Arc<dyn Coordinator>,
    root: String,
}

impl std::fmt::Debug for BacklogMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacklogMetrics")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl BacklogMetrics {
    /// Creates metrics rooted at `root`.
    #[must_use]
    pub fn new(coordinator: Arc<dyn Coordinator>, root: &str) -> Self {
        Self {
            coordinator,
            root: root.trim_end_matches('/').to_string(),
        }
    }

    /// Records the current backlog of `group` on every partition the
    /// inspector is assigned.
    ///
    /// # Errors
    ///
    /// Propagates bus and Coordinator failures.
    pub async fn publish_consumer_backlog(
        &self,
        inspector: &dyn BusInspector,
        topic: &str,
        group: &str,
    ) -> Result<Vec<PartitionBacklog>, BacklogError> {
        let mut recorded = Vec::new();
        for partition in inspector.assigned_partitions(topic).await? {
            let topic_offset = inspector.high_watermark(topic, partition).await?;
            let consumer_offset = inspector.committed_offset(topic, partition).await?;

            // Topic offset first: readers must never see a consumer
            // offset ahead of its topic offset.
            self.write_offset(&self.topic_path(topic, partition), topic_offset)
                .await?;
            if let Some(offset) = consumer_offset {
                self.write_offset(&self.consumer_path(topic, partition, group), offset)
                    .await?;
            }
            debug!(topic, partition, group, topic_offset, ?consumer_offset, "recorded backlog");
            recorded.push(PartitionBacklog {
                partition,
                topic_offset,
                consumer_offset,
            });
        }
        Ok(recorded)
    }

    /// Records the current high-watermarks of every partition under a
    /// named snapshot.
    ///
    /// # Errors
    ///
    /// Propagates bus and Coordinator failures.
    pub async fn snapshot_topic_offsets(
        &self,
        inspector: &dyn BusInspector,
        topic: &str,
        name: &str,
    ) -> Result<Vec<PartitionBacklog>, BacklogError> {
        let mut recorded = Vec::new();
        for partition in inspector.all_partitions(topic).await? {
            let topic_offset = inspector.high_watermark(topic, partition).await?;
            self.write_offset(&self.snapshot_path(topic, partition, name), topic_offset)
                .await?;
            recorded.push(PartitionBacklog {
                partition,
                topic_offset,
                consumer_offset: None,
            });
        }
        debug!(topic, name, partitions = recorded.len(), "snapshotted topic offsets");
        Ok(recorded)
    }

    /// Checks recorded consumer lag against `max_lag`.
    ///
    /// Returns the first partition whose `topic − consumer` exceeds
    /// `max_lag`, or `None` when every partition is within bounds. With
    /// `group = None` every group recorded under a partition is checked.
    /// A group with no recorded offset counts as never having consumed.
    ///
    /// # Errors
    ///
    /// Propagates Coordinator failures.
    pub async fn check_consumer_lag(
        &self,
        topic: &str,
        group: Option<&str>,
        max_lag: i64,
    ) -> Result<Option<ConsumerLag>, BacklogError> {
        for partition in self.recorded_partitions(topic).await? {
            let Some(topic_offset) = self.read_offset(&self.topic_path(topic, partition)).await?
            else {
                continue;
            };
            for group in self.groups_for(topic, partition, group).await? {
                let consumer_offset = self
                    .read_offset(&self.consumer_path(topic, partition, &group))
                    .await?
                    .unwrap_or(0);
                let lag = (topic_offset - consumer_offset).max(0);
                if lag > max_lag {
                    return Ok(Some(ConsumerLag {
                        partition,
                        group,
                        lag,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Checks consumer progress against a named snapshot.
    ///
    /// Returns the first partition whose consumer offset is still behind
    /// the snapshotted offset. A partition with no snapshot node has
    /// progressed by definition — nothing was ever produced on it.
    ///
    /// # Errors
    ///
    /// Propagates Coordinator failures.
    pub async fn check_consumer_progress(
        &self,
        topic: &str,
        group: Option<&str>,
        name: &str,
    ) -> Result<Option<ConsumerLag>, BacklogError> {
        for partition in self.recorded_partitions(topic).await? {
            let Some(target) = self
                .read_offset(&self.snapshot_path(topic, partition, name))
                .await?
            else {
                continue;
            };
            for group in self.groups_for(topic, partition, group).await? {
                let consumer_offset = self
                    .read_offset(&self.consumer_path(topic, partition, &group))
                    .await?
                    .unwrap_or(0);
                if consumer_offset < target {
                    return Ok(Some(ConsumerLag {
                        partition,
                        group,
                        lag: target - consumer_offset,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Partitions with a recorded topic offset.
    async fn recorded_partitions(&self, topic: &str) -> Result<Vec<i32>, CoordinatorError> {
        let path = format!("{}/{topic}/topic", self.root);
        let names = match self.coordinator.children(&path).await {
            Ok(names) => names,
            Err(CoordinatorError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut partitions: Vec<i32> = names.iter().filter_map(|n| n.parse().ok()).collect();
        partitions.sort_unstable();
        Ok(partitions)
    }

    /// Groups to check on a partition: the requested one, or all recorded.
    async fn groups_for(
        &self,
        topic: &str,
        partition: i32,
        group: Option<&str>,
    ) -> Result<Vec<String>, CoordinatorError> {
        if let Some(group) = group {
            return Ok(vec![group.to_string()]);
        }
        let path = format!("{}/{topic}/consumers/{partition}", self.root);
        match self.coordinator.children(&path).await {
            Ok(names) => Ok(names),
            Err(CoordinatorError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn write_offset(&self, path: &str, offset: i64) -> Result<(), CoordinatorError> {
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.coordinator.mkdirp(parent).await?;
        }
        let data = serde_json::to_vec(&offset).unwrap_or_default();
        self.coordinator.set(path, &data, None).await
    }

    async fn read_offset(&self, path: &str) -> Result<Option<i64>, CoordinatorError> {
        match self.coordinator.get(path).await {
            Ok(node) if node.data.is_empty() => Ok(None),
            Ok(node) => serde_json::from_slice(&node.data)
                .map(Some)
                .map_err(|source| CoordinatorError::Decode {
                    path: path.to_string(),
                    source,
                }),
            Err(CoordinatorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn topic_path(&self, topic: &str, partition: i32) -> String {
        format!("{}/{topic}/topic/{partition}", self.root)
    }

    fn consumer_path(&self, topic: &str, partition: i32, group: &str) -> String {
        format!("{}/{topic}/consumers/{partition}/{group}", self.root)
    }

    fn snapshot_path(&self, topic: &str, partition: i32, name: &str) -> String {
        format!("{}/{topic}/snapshots/{partition}/{name}", self.root)
    }
}
