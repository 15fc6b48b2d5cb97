//! The Coordinator contract.
//!
//! A Coordinator is a strongly consistent, hierarchical key-value store:
//! slash-separated paths, versioned nodes, distinguishable missing-node
//! errors, and atomic path creation. Production deployments back this
//! trait with an external cluster; [`crate::memory::MemoryCoordinator`]
//! is the in-process reference used by tests and embedded setups. The
//! external contract also covers watches and ephemeral nodes; the
//! ingestion core does not use either.

use async_trait::async_trait;

use crate::error::CoordinatorError;

/// A node's data together with its write version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Raw node payload.
    pub data: Vec<u8>,
    /// Version, incremented on every successful write.
    pub version: u64,
}

/// Strongly consistent hierarchical key-value store.
///
/// All paths are absolute (`/a/b/c`). Writes are idempotent under retry:
/// a repeated unconditional `set` converges, and a repeated CAS either
/// succeeds or fails with [`CoordinatorError::Conflict`] without partial
/// effects.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Creates a node, failing with [`CoordinatorError::AlreadyExists`]
    /// if it is present.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::AlreadyExists`] or a backend error.
    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinatorError>;

    /// Writes a node.
    ///
    /// With `version = None` the write is set-or-create. With
    /// `version = Some(v)` the write only succeeds if the node's current
    /// version is `v` (compare-and-set).
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::Conflict`] on a lost CAS,
    /// [`CoordinatorError::NotFound`] when CAS targets a missing node,
    /// or a backend error.
    async fn set(
        &self,
        path: &str,
        data: &[u8],
        version: Option<u64>,
    ) -> Result<(), CoordinatorError>;

    /// Reads a node.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::NotFound`] or a backend error.
    async fn get(&self, path: &str) -> Result<Node, CoordinatorError>;

    /// Lists the names of a node's direct children.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::NotFound`] or a backend error.
    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinatorError>;

    /// Creates the path and all its ancestors, atomically and
    /// idempotently. Existing nodes are left untouched.
    ///
    /// # Errors
    ///
    /// A backend error.
    async fn mkdirp(&self, path: &str) -> Result<(), CoordinatorError>;
}
