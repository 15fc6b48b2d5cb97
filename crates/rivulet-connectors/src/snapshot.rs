//! Snapshot producer: a bucket's current inventory as synthetic puts.
//!
//! The snapshot phase replays the bucket's existing objects into the
//! target as if they had just been written. One call produces one page
//! of the listing; the continuation markers in [`InitState`] carry the
//! phase across batch cycles and across crashes.
//!
//! The log head (`cseq`) is captured *before* the first listing begins:
//! anchoring the tail phase there guarantees no mutation that lands
//! during the snapshot is ever missed. On a resumed snapshot the
//! original capture is already persisted as the log offset, so it is
//! deliberately not re-taken — a later head would skip the mutations
//! made while the snapshot was running.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use rivulet_core::event::Event;
use rivulet_core::state::InitState;

use crate::client::SourceApi;
use crate::error::SourceError;

/// Default bound on concurrent metadata fetches per bucket.
pub const DEFAULT_METADATA_FAN_OUT: usize = 10;

/// One page of snapshot output.
#[derive(Debug)]
pub struct SnapshotBatch {
    /// Synthetic put events, in list order.
    pub events: Vec<Event>,
    /// Updated snapshot progress to persist with the batch.
    pub init: InitState,
    /// Log head captured at the start of a fresh snapshot; `None` on
    /// resumed pages.
    pub cseq: Option<u64>,
}

/// Produces snapshot pages for one bucket.
pub struct SnapshotProducer {
    source: Arc<dyn SourceApi>,
    fan_out: usize,
}

impl std::fmt::Debug for SnapshotProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotProducer")
            .field("fan_out", &self.fan_out)
            .finish_non_exhaustive()
    }
}

impl SnapshotProducer {
    /// Creates a producer with the default metadata fan-out.
    #[must_use]
    pub fn new(source: Arc<dyn SourceApi>) -> Self {
        Self::with_fan_out(source, DEFAULT_METADATA_FAN_OUT)
    }

    /// Creates a producer with an explicit metadata fan-out bound.
    #[must_use]
    pub fn with_fan_out(source: Arc<dyn SourceApi>, fan_out: usize) -> Self {
        Self {
            source,
            fan_out: fan_out.max(1),
        }
    }

    /// Produces the next snapshot page for `bucket`.
    ///
    /// `partition` is the bucket's log partition (for the head capture),
    /// `target` the bucket name events carry, `init` the persisted
    /// progress, and `max_keys` the page bound.
    ///
    /// # Errors
    ///
    /// Transport failures; a missing object's metadata is skipped, not
    /// fatal.
    pub async fn produce(
        &self,
        bucket: &str,
        target: &str,
        partition: u64,
        init: &InitState,
        max_keys: usize,
    ) -> Result<SnapshotBatch, SourceError> {
        // Head capture must precede the listing.
        let cseq = if init.is_resumption() {
            None
        } else {
            let mut head = self.source.read_log(partition, 1, 2, false).await?;
            let cseq = head.info().await?.cseq;
            debug!(bucket, partition, ?cseq, "captured log head for snapshot");
            cseq
        };

        let page = self
            .source
            .list_objects(
                bucket,
                init.key_marker.as_deref(),
                init.version_marker.as_deref(),
                max_keys,
            )
            .await?;

        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let fetches = page.contents.iter().map(|listed| {
            let semaphore = Arc::clone(&semaphore);
            let key = listed.key.clone();
            async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire().await.ok();
                let metadata = self.source.get_object_metadata(bucket, &key).await;
                (key, metadata)
            }
        });

        // join_all keeps list order regardless of completion order.
        let mut events = Vec::with_capacity(page.contents.len());
        for (key, metadata) in futures::future::join_all(fetches).await {
            match metadata {
                Ok(metadata) => {
                    events.push(Event::object_put(metadata.to_string(), key, target));
                }
                Err(SourceError::MissingMetadata { .. }) => {
                    warn!(bucket, key = %key, "object vanished during snapshot, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        let init = if page.is_truncated {
            InitState {
                is_status_complete: false,
                key_marker: page.next_key_marker,
                version_marker: page.next_version_marker,
            }
        } else {
            InitState {
                is_status_complete: true,
                key_marker: None,
                version_marker: None,
            }
        };

        debug!(
            bucket,
            events = events.len(),
            complete = init.is_status_complete,
            "produced snapshot page"
        );
        Ok(SnapshotBatch { events, init, cseq })
    }
}
