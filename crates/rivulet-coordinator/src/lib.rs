//! # Rivulet Coordinator
//!
//! The pipeline's durable state lives on a strongly consistent,
//! hierarchical key-value store — the Coordinator. This crate defines the
//! contract the rest of the workspace programs against, an in-process
//! reference backend, the per-bucket ingestion progress store, and the
//! consumer backlog metrics kept alongside the message bus.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Coordinator contract and node model
pub mod store;

/// In-process reference backend
pub mod memory;

/// Durable per-bucket ingestion progress
pub mod progress;

/// Consumer backlog bookkeeping and checks
pub mod backlog;

/// Error types
pub mod error;

pub use backlog::{BacklogMetrics, BusInspector, ConsumerLag, InspectorError, PartitionBacklog};
pub use error::{BacklogError, CoordinatorError};
pub use memory::MemoryCoordinator;
pub use progress::ProgressStore;
pub use store::{Coordinator, Node};
