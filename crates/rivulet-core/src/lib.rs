//! # Rivulet Core
//!
//! Shared data model for the Rivulet bucket ingestion pipeline: the
//! canonical event published on the message bus, the raft-log record
//! shapes read from the source cluster, the plug-in filter contract,
//! and the per-bucket progress tuple.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Canonical events and their constructors
pub mod event;

/// Raft-log record model and key rewrite rules
pub mod record;

/// Plug-in filters and the per-batch staging area
pub mod extension;

/// Per-bucket ingestion progress
pub mod state;

pub use event::{Event, EventKind, METASTORE_BUCKET, USERS_BUCKET, VID_SEP};
pub use extension::{EntryBatch, Extension, IngestionExtension};
pub use record::{LogEntry, LogInfo, LogRecord};
pub use state::InitState;
