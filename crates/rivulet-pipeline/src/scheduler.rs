//! Tick scheduler and the populator facade.
//!
//! Each reader runs in its own tokio task with exclusive ownership — no
//! `Arc<Mutex>` around the hot path. A shared semaphore bounds how many
//! batch cycles run concurrently across buckets; within one bucket the
//! task loop is strictly serial, so at most one batch is ever in flight
//! per reader even when ticks pile up. Cancellation is observed between
//! batches, never inside one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rivulet_connectors::bus::EventBus;
use rivulet_connectors::client::SourceApi;
use rivulet_connectors::config::SourceBucketConfig;
use rivulet_coordinator::store::Coordinator;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::metrics::{ReaderMetrics, ReaderMetricsSnapshot};
use crate::reader::IngestionReader;

/// Handle to a spawned reader task.
pub struct ReaderHandle {
    /// Source bucket the reader ingests.
    pub bucket: String,
    /// Task join handle; resolves to the reader for inspection.
    pub join: tokio::task::JoinHandle<IngestionReader>,
    /// Cancels the task at the next between-batch point.
    pub shutdown: CancellationToken,
    /// Lock-free metrics (shared with the task).
    pub metrics: Arc<ReaderMetrics>,
    /// Pushes refreshed source configuration into the task.
    pub refresh: watch::Sender<SourceBucketConfig>,
}

/// Spawns the tick loop for one reader.
///
/// Every tick: apply any pending config refresh, take a parallelism
/// permit, make sure the reader is set up, run one batch cycle. Errors
/// are logged with bucket context and absorbed — nothing propagates out
/// of the loop, the next tick simply retries.
#[must_use]
pub fn spawn_reader_task(
    mut reader: IngestionReader,
    tick: Duration,
    permits: Arc<Semaphore>,
) -> ReaderHandle {
    let bucket = reader.config().bucket.clone();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let metrics = reader.metrics();
    let (refresh_tx, mut refresh_rx) = watch::channel(reader.config().clone());

    let task_bucket = bucket.clone();
    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(bucket = %task_bucket, "reader task started");

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            if refresh_rx.has_changed().unwrap_or(false) {
                let config = refresh_rx.borrow_and_update().clone();
                if let Err(e) = reader.refresh(config) {
                    warn!(bucket = %task_bucket, error = %e, "config refresh failed");
                }
            }

            let permit = tokio::select! {
                biased;
                () = token.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                // Semaphore closed: the populator is shutting down.
                break;
            };

            if let Err(e) = reader.setup().await {
                warn!(method = "setup", bucket = %task_bucket, error = %e, "retrying next tick");
                continue;
            }
            match reader.run_batch_cycle().await {
                Ok(Some(outcome)) => {
                    debug!(
                        bucket = %task_bucket,
                        phase = ?outcome.phase,
                        records = outcome.records_read,
                        published = outcome.published,
                        "tick complete"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        method = "run_batch_cycle",
                        bucket = %task_bucket,
                        error = %e,
                        "batch aborted, no progress advanced"
                    );
                }
            }
        }

        debug!(bucket = %task_bucket, "reader task stopped");
        reader
    });

    ReaderHandle {
        bucket,
        join,
        shutdown,
        metrics,
        refresh: refresh_tx,
    }
}

/// Owns the readers for every configured source bucket.
pub struct Populator {
    config: PipelineConfig,
    coordinator: Arc<dyn Coordinator>,
    bus: Arc<dyn EventBus>,
    permits: Arc<Semaphore>,
    handles: Vec<ReaderHandle>,
}

impl std::fmt::Debug for Populator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Populator")
            .field("readers", &self.handles.len())
            .field("topic", &self.config.topic)
            .finish_non_exhaustive()
    }
}

impl Populator {
    /// Creates a populator over shared Coordinator and bus handles.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        coordinator: Arc<dyn Coordinator>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_parallel_readers.max(1)));
        Self {
            config,
            coordinator,
            bus,
            permits,
            handles: Vec::new(),
        }
    }

    /// Adds a source bucket with its own HTTP client and starts its
    /// reader task.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Source`] if the client cannot be built; nothing
    /// is spawned in that case.
    pub fn add_source(&mut self, config: SourceBucketConfig) -> Result<(), PipelineError> {
        let reader = IngestionReader::connect(
            config,
            &self.config,
            Arc::clone(&self.bus),
            Arc::clone(&self.coordinator),
        )?;
        self.spawn(reader);
        Ok(())
    }

    /// Adds a source bucket over an explicit transport (tests, custom
    /// wiring) and starts its reader task.
    pub fn add_source_with(&mut self, config: SourceBucketConfig, source: Arc<dyn SourceApi>) {
        let reader = IngestionReader::new(
            config,
            &self.config,
            source,
            Arc::clone(&self.bus),
            Arc::clone(&self.coordinator),
        );
        self.spawn(reader);
    }

    fn spawn(&mut self, reader: IngestionReader) {
        info!(bucket = %reader.config().bucket, "starting ingestion reader");
        let handle = spawn_reader_task(
            reader,
            self.config.tick_interval,
            Arc::clone(&self.permits),
        );
        self.handles.push(handle);
    }

    /// Pushes refreshed source configs to their reader tasks, matched by
    /// bucket name. Unknown buckets are ignored; progress is preserved
    /// across every refresh.
    pub fn refresh_sources(&self, configs: &[SourceBucketConfig]) {
        for config in configs {
            if let Some(handle) = self.handles.iter().find(|h| h.bucket == config.bucket) {
                let _ = handle.refresh.send(config.clone());
            }
        }
    }

    /// Metrics snapshots per bucket.
    #[must_use]
    pub fn metrics(&self) -> Vec<(String, ReaderMetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.bucket.clone(), h.metrics.snapshot()))
            .collect()
    }

    /// Number of running readers.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.handles.len()
    }

    /// Stops every reader at its next between-batch point and joins the
    /// tasks.
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.shutdown.cancel();
        }
        self.permits.close();
        for handle in self.handles {
            if handle.join.await.is_err() {
                warn!(bucket = %handle.bucket, "reader task panicked during shutdown");
            }
        }
        info!("populator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_connectors::testing::{MockEventBus, MockSourceApi};
    use rivulet_coordinator::memory::MemoryCoordinator;

    fn source_config(bucket: &str) -> SourceBucketConfig {
        SourceBucketConfig {
            name: "zenko".into(),
            bucket: bucket.into(),
            host: "127.0.0.1".into(),
            port: 9000,
            https: false,
            location_constraint: None,
            access_key: "ak".into(),
            secret_key: "sk".into(),
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            tick_interval: Duration::from_millis(10),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_scheduler_drives_batches() {
        let source = Arc::new(MockSourceApi::new(1));
        source.set_cseq(3);
        source.put_object("object1", serde_json::json!({}));
        let bus = Arc::new(MockEventBus::new());

        let mut populator = Populator::new(
            fast_config(),
            Arc::new(MemoryCoordinator::new()),
            Arc::clone(&bus) as Arc<dyn EventBus>,
        );
        populator.add_source_with(source_config("b1"), source);
        assert_eq!(populator.reader_count(), 1);

        // A few ticks: snapshot publishes the one object.
        tokio::time::sleep(Duration::from_millis(100)).await;
        populator.shutdown().await;

        assert_eq!(bus.entries().len(), 1);
        assert_eq!(bus.entries()[0].key, "object1");
    }

    #[tokio::test]
    async fn test_shutdown_returns_promptly_and_reports_metrics() {
        let source = Arc::new(MockSourceApi::new(1));
        source.set_cseq(1);
        let bus = Arc::new(MockEventBus::new());

        let mut populator = Populator::new(
            fast_config(),
            Arc::new(MemoryCoordinator::new()),
            bus as Arc<dyn EventBus>,
        );
        populator.add_source_with(source_config("b1"), source);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let metrics = populator.metrics();
        assert_eq!(metrics.len(), 1);
        assert!(metrics[0].1.batches >= 1);
        populator.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_reaches_running_reader() {
        let source = Arc::new(MockSourceApi::new(1));
        source.set_cseq(1);
        let bus = Arc::new(MockEventBus::new());

        let mut populator = Populator::new(
            fast_config(),
            Arc::new(MemoryCoordinator::new()),
            bus as Arc<dyn EventBus>,
        );
        populator.add_source_with(source_config("b1"), source);

        // Same canonical form: accepted without a client rebuild.
        populator.refresh_sources(&[source_config("b1")]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        populator.shutdown().await;
    }
}
