//! The per-bucket ingestion reader state machine.
//!
//! One reader per configured source bucket. `setup()` binds the bucket
//! to its log partition; each tick then runs at most one batch cycle in
//! four phases — read, prepare, publish, checkpoint — carried by an
//! explicit [`BatchContext`] value. An error anywhere aborts the cycle
//! without advancing progress; the next tick retries. Publishing is
//! all-or-nothing per batch and the offset is only checkpointed after a
//! successful publish, which is exactly what makes delivery
//! at-least-once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use rivulet_connectors::bus::{BusEntry, EventBus};
use rivulet_connectors::client::{HttpSourceClient, SourceApi};
use rivulet_connectors::config::SourceBucketConfig;
use rivulet_connectors::snapshot::{SnapshotBatch, SnapshotProducer};
use rivulet_connectors::tail::TailProducer;
use rivulet_coordinator::progress::ProgressStore;
use rivulet_coordinator::store::Coordinator;
use rivulet_core::event::Event;
use rivulet_core::extension::{EntryBatch, Extension, IngestionExtension};
use rivulet_core::record::LogInfo;
use rivulet_core::state::InitState;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::metrics::ReaderMetrics;

/// Which side of the state machine a batch ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// Replaying the bucket's existing inventory.
    Snapshot,
    /// Tailing the live record log.
    Tail,
}

/// Summary of one completed batch cycle.
#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    /// Phase the cycle ran.
    pub phase: BatchPhase,
    /// Log records read (snapshot: versioned keys).
    pub records_read: u64,
    /// Entries inspected.
    pub entries_read: u64,
    /// Events published to the bus.
    pub published: u64,
    /// Offset the checkpoint advanced to, when it moved.
    pub advanced_to: Option<u64>,
}

/// Context value threaded through the four phases of a cycle.
struct BatchContext {
    phase: BatchPhase,
    batch: EntryBatch,
    records_read: u64,
    entries_read: u64,
    log_offset: u64,
    info: LogInfo,
    init_to_persist: Option<InitState>,
    snapshot_cseq: Option<u64>,
}

impl BatchContext {
    fn new(phase: BatchPhase, log_offset: u64) -> Self {
        Self {
            phase,
            batch: EntryBatch::new(),
            records_read: 0,
            entries_read: 0,
            log_offset,
            info: LogInfo::default(),
            init_to_persist: None,
            snapshot_cseq: None,
        }
    }

    /// Offset to stage for the checkpoint phase.
    ///
    /// A fresh snapshot anchors the tail at the captured log head; a
    /// tail batch advances past every record it read. A read that
    /// produced no records (`start` unset) stages nothing.
    fn staged_offset(&self) -> Option<u64> {
        match self.phase {
            BatchPhase::Snapshot => self.snapshot_cseq,
            BatchPhase::Tail => self.info.start.map(|start| start + self.records_read),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Uninitialized,
    Ready,
}

/// Ingestion reader for one source bucket.
pub struct IngestionReader {
    config: SourceBucketConfig,
    target: String,
    source: Arc<dyn SourceApi>,
    snapshot: SnapshotProducer,
    tail: TailProducer,
    progress: ProgressStore,
    bus: Arc<dyn EventBus>,
    extensions: Vec<Box<dyn Extension>>,
    topic: String,
    batch_max_read: u64,
    publish_timeout: Duration,
    metadata_fan_out: usize,
    metrics: Arc<ReaderMetrics>,
    state: ReaderState,
    batch_in_progress: bool,
}

impl std::fmt::Debug for IngestionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionReader")
            .field("bucket", &self.config.bucket)
            .field("target", &self.target)
            .field("state", &self.state)
            .field("batch_in_progress", &self.batch_in_progress)
            .finish_non_exhaustive()
    }
}

impl IngestionReader {
    /// Builds a reader over an explicit source transport.
    #[must_use]
    pub fn new(
        config: SourceBucketConfig,
        pipeline: &PipelineConfig,
        source: Arc<dyn SourceApi>,
        bus: Arc<dyn EventBus>,
        coordinator: Arc<dyn Coordinator>,
    ) -> Self {
        let target = config.target_bucket();
        let progress = ProgressStore::new(coordinator, &pipeline.coordinator_root, &target);
        Self {
            target,
            snapshot: SnapshotProducer::with_fan_out(
                Arc::clone(&source),
                pipeline.metadata_fan_out,
            ),
            tail: TailProducer::new(Arc::clone(&source)),
            source,
            progress,
            bus,
            extensions: vec![Box::new(IngestionExtension)],
            topic: pipeline.topic.clone(),
            batch_max_read: pipeline.batch_max_read,
            publish_timeout: pipeline.publish_timeout,
            metadata_fan_out: pipeline.metadata_fan_out,
            metrics: Arc::new(ReaderMetrics::default()),
            state: ReaderState::Uninitialized,
            batch_in_progress: false,
            config,
        }
    }

    /// Builds a reader with its own HTTP client for the source.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Source`] if the client cannot be built.
    pub fn connect(
        config: SourceBucketConfig,
        pipeline: &PipelineConfig,
        bus: Arc<dyn EventBus>,
        coordinator: Arc<dyn Coordinator>,
    ) -> Result<Self, PipelineError> {
        let source = Arc::new(HttpSourceClient::new(&config)?);
        Ok(Self::new(config, pipeline, source, bus, coordinator))
    }

    /// Adds an extension after the built-in ingestion one.
    pub fn push_extension(&mut self, extension: Box<dyn Extension>) {
        self.extensions.push(extension);
    }

    /// The reader's source configuration.
    #[must_use]
    pub fn config(&self) -> &SourceBucketConfig {
        &self.config
    }

    /// Shared metrics handle.
    #[must_use]
    pub fn metrics(&self) -> Arc<ReaderMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Resolves the bucket's log partition and binds progress paths.
    ///
    /// Idempotent; reruns after a failure are safe.
    ///
    /// # Errors
    ///
    /// Source lookup or Coordinator failures leave the reader
    /// uninitialized for the next tick to retry.
    pub async fn setup(&mut self) -> Result<(), PipelineError> {
        if self.state == ReaderState::Ready {
            return Ok(());
        }
        let resolved = self.source.lookup_partition(&self.config.bucket).await?;
        let raft_id = self.progress.setup_raft_id(resolved).await?;
        info!(bucket = %self.config.bucket, target = %self.target, raft_id, "reader ready");
        self.state = ReaderState::Ready;
        Ok(())
    }

    /// Runs one batch cycle; `None` when a cycle is already in flight.
    ///
    /// # Errors
    ///
    /// The failed cycle's cause; no progress was advanced and the next
    /// tick retries.
    pub async fn run_batch_cycle(&mut self) -> Result<Option<BatchOutcome>, PipelineError> {
        if self.state != ReaderState::Ready {
            return Err(PipelineError::NotReady(self.config.bucket.clone()));
        }
        if self.batch_in_progress {
            debug!(bucket = %self.config.bucket, "batch already in progress, skipping tick");
            return Ok(None);
        }
        self.batch_in_progress = true;
        let result = self.execute_batch().await;
        self.batch_in_progress = false;
        match result {
            Ok(outcome) => {
                self.metrics.record_batch(
                    outcome.records_read,
                    outcome.entries_read,
                    outcome.published,
                );
                Ok(Some(outcome))
            }
            Err(e) => {
                self.metrics.record_error();
                Err(e)
            }
        }
    }

    /// Rebuilds the source client when editable fields changed.
    ///
    /// Progress is untouched either way; returns whether a rebuild
    /// happened.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Source`] if the new client cannot be built; the
    /// old client stays in place.
    pub fn refresh(&mut self, config: SourceBucketConfig) -> Result<bool, PipelineError> {
        if config.canonical_form() == self.config.canonical_form() {
            self.config = config;
            return Ok(false);
        }
        let source = Arc::new(HttpSourceClient::new(&config)?);
        info!(bucket = %config.bucket, "source credentials changed, rebuilding client");
        self.replace_source(source);
        self.config = config;
        Ok(true)
    }

    /// Swaps the source transport, keeping progress and extensions.
    pub fn replace_source(&mut self, source: Arc<dyn SourceApi>) {
        self.snapshot = SnapshotProducer::with_fan_out(Arc::clone(&source), self.metadata_fan_out);
        self.tail = TailProducer::new(Arc::clone(&source));
        self.source = source;
    }

    /// The four-phase cycle.
    #[allow(clippy::cast_possible_truncation)] // batch sizes fit in u64
    async fn execute_batch(&mut self) -> Result<BatchOutcome, PipelineError> {
        // Phase 1: read.
        let init = self.progress.read_init().await?;
        let log_offset = self.progress.read_log_offset().await?;
        let raft_id = self
            .progress
            .raft_id()
            .ok_or_else(|| PipelineError::NotReady(self.config.bucket.clone()))?;

        // Phase 2: prepare.
        let mut ctx = if init.is_status_complete {
            self.prepare_tail(raft_id, log_offset).await?
        } else {
            self.prepare_snapshot(raft_id, log_offset, &init).await?
        };

        // Phase 3: publish (all-or-nothing).
        let staged_offset = ctx.staged_offset();
        let events = std::mem::take(&mut ctx.batch).into_events();
        let published = events.len() as u64;
        if !events.is_empty() {
            let entries: Vec<BusEntry> = events.iter().map(BusEntry::from_event).collect();
            self.bus
                .publish(&self.topic, &entries, self.publish_timeout)
                .await?;
        }

        // Phase 4: checkpoint. Only now is the batch complete.
        if let Some(init) = ctx.init_to_persist.take() {
            self.progress.write_init(&init).await?;
        }
        let mut advanced_to = None;
        if let Some(next) = staged_offset {
            if next > ctx.log_offset {
                self.progress.write_log_offset(next).await?;
                advanced_to = Some(next);
            }
        }

        debug!(
            bucket = %self.config.bucket,
            phase = ?ctx.phase,
            records = ctx.records_read,
            published,
            ?advanced_to,
            "batch cycle complete"
        );
        Ok(BatchOutcome {
            phase: ctx.phase,
            records_read: ctx.records_read,
            entries_read: ctx.entries_read,
            published,
            advanced_to,
        })
    }

    /// Snapshot read + prepare: one listing page as synthetic puts.
    async fn prepare_snapshot(
        &self,
        raft_id: u64,
        log_offset: u64,
        init: &InitState,
    ) -> Result<BatchContext, PipelineError> {
        let SnapshotBatch { events, init, cseq } = self
            .snapshot
            .produce(
                &self.config.bucket,
                &self.target,
                raft_id,
                init,
                usize::try_from(self.batch_max_read).unwrap_or(usize::MAX),
            )
            .await?;

        let mut ctx = BatchContext::new(BatchPhase::Snapshot, log_offset);
        ctx.snapshot_cseq = cseq;
        ctx.init_to_persist = Some(init);
        for event in &events {
            if event.is_versioned() {
                ctx.records_read += 1;
            }
            ctx.entries_read += 1;
            self.apply_extensions(event, &mut ctx.batch);
        }
        Ok(ctx)
    }

    /// Tail read + prepare: drain one bounded log window.
    async fn prepare_tail(
        &self,
        raft_id: u64,
        log_offset: u64,
    ) -> Result<BatchContext, PipelineError> {
        let mut stream = self
            .tail
            .produce(raft_id, log_offset, self.batch_max_read)
            .await?;

        let mut ctx = BatchContext::new(BatchPhase::Tail, log_offset);
        ctx.info = stream.info().await?;
        while let Some(mut record) = stream.next_record().await? {
            // The offset advances past every record read, matching or not.
            ctx.records_read += 1;
            let matches = record.matches(&self.config.bucket);
            record.rewrite_for(&self.target);
            if !matches {
                continue;
            }
            let bucket = record.db.clone().unwrap_or_else(|| self.target.clone());
            for entry in &record.entries {
                if entry.key.is_none() && entry.kind.is_none() {
                    continue;
                }
                ctx.entries_read += 1;
                let event = Event {
                    kind: entry.kind_or_default(),
                    bucket: bucket.clone(),
                    key: entry.key.clone().unwrap_or_default(),
                    value: entry.value_string(),
                };
                self.apply_extensions(&event, &mut ctx.batch);
            }
        }
        Ok(ctx)
    }

    fn apply_extensions(&self, event: &Event, batch: &mut EntryBatch) {
        for extension in &self.extensions {
            extension.filter(event, batch);
        }
    }
}
