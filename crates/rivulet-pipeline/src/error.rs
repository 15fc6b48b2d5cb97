//! Error types for the ingestion pipeline.

use thiserror::Error;

use rivulet_connectors::error::{BusError, SourceError};
use rivulet_coordinator::error::CoordinatorError;

use crate::config::ConfigError;

/// Errors aborting a batch cycle or a reader.
///
/// None of these propagate past the scheduler: a failed cycle is logged
/// with its bucket and offset context and retried on the next tick
/// without having advanced any progress.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source cluster failure.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Coordinator failure, including lost CAS races.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// Bus publish failure; the batch offset stays put.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Configuration or secret failure; the reader refuses to start.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation ran before `setup()` bound the reader.
    #[error("reader for {0} is not set up")]
    NotReady(String),
}
