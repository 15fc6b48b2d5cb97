//! Error types for coordinator-backed state.

use thiserror::Error;

use crate::backlog::InspectorError;

/// Errors from Coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The node does not exist.
    #[error("node not found: {0}")]
    NotFound(String),

    /// Create was attempted on an existing node.
    #[error("node already exists: {0}")]
    AlreadyExists(String),

    /// A compare-and-set write lost the race; the caller retries on the
    /// next cycle.
    #[error("version conflict on {path}: expected {expected}, found {actual}")]
    Conflict {
        /// Node path the write targeted.
        path: String,
        /// Version the writer expected.
        expected: u64,
        /// Version actually on the node.
        actual: u64,
    },

    /// A node value did not decode as the expected JSON scalar.
    #[error("malformed value at {path}: {source}")]
    Decode {
        /// Node path holding the malformed value.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The backend is unreachable or failed internally.
    #[error("coordinator backend: {0}")]
    Backend(String),
}

/// Errors from backlog bookkeeping.
#[derive(Debug, Error)]
pub enum BacklogError {
    /// Coordinator read or write failed.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// Bus offset query failed.
    #[error(transparent)]
    Inspector(#[from] InspectorError),
}
