//! # Rivulet Connectors
//!
//! Everything that talks to the outside world on behalf of the ingestion
//! pipeline: the typed client over the source cluster's extended
//! S3-compatible API, the incremental raft-log record stream, the
//! snapshot and tail producers feeding the per-bucket readers, and the
//! message-bus producer. Kafka-backed implementations live behind the
//! `kafka` feature; the rest of the workspace programs against the
//! traits so every data path is testable without a broker or a cluster.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Error types
pub mod error;

/// Per-bucket source configuration
pub mod config;

/// Typed client over the source bucket API
pub mod client;

/// Incremental raft-log record stream
pub mod stream;

/// Snapshot producer: bucket inventory as synthetic puts
pub mod snapshot;

/// Tail producer: live log windows
pub mod tail;

/// Message-bus producer contract
pub mod bus;

/// Kafka producer and offset inspector
#[cfg(feature = "kafka")]
pub mod kafka;

/// Mock connectors for tests
pub mod testing;

pub use bus::{BusEntry, EventBus};
pub use client::{HttpSourceClient, ListPage, SourceApi};
pub use config::SourceBucketConfig;
pub use error::{BusError, SourceError};
pub use snapshot::{SnapshotBatch, SnapshotProducer};
pub use stream::LogRecordStream;
pub use tail::TailProducer;
