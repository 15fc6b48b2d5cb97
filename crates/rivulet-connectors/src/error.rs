//! Error types for source and bus connectors.

use thiserror::Error;

/// Errors from the source cluster.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure (connect, TLS, mid-stream).
    #[error("source transport: {0}")]
    Http(#[from] reqwest::Error),

    /// The source answered with an unexpected status.
    #[error("source returned {status} for {operation}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Operation that observed it.
        operation: &'static str,
    },

    /// No log partition carries the bucket.
    #[error("no log partition for bucket {0}")]
    PartitionNotFound(String),

    /// Object listed but its metadata is gone; callers skip it.
    #[error("missing metadata for {bucket}/{key}")]
    MissingMetadata {
        /// Bucket holding the object.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// The log stream carried malformed JSON.
    #[error("malformed log response: {0}")]
    Parse(String),

    /// The log stream ended mid-document.
    #[error("log response truncated")]
    Truncated,
}

/// Errors from the message bus producer.
#[derive(Debug, Error)]
pub enum BusError {
    /// Producer could not be constructed.
    #[error("bus producer setup: {0}")]
    Setup(String),

    /// One or more entries in a batch failed delivery; the whole batch
    /// is considered failed.
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// Destination topic.
        topic: String,
        /// Broker-reported reason.
        reason: String,
    },
}
