//! In-process Coordinator backend.
//!
//! Single-process, linearizable by construction (one lock around the
//! tree). Used by tests and embedded deployments; a clustered backend
//! implements the same trait out of tree.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::CoordinatorError;
use crate::store::{Coordinator, Node};

#[derive(Debug, Clone)]
struct Stored {
    data: Vec<u8>,
    version: u64,
}

/// In-memory Coordinator.
///
/// Paths are kept in a sorted map so child listing is a bounded range
/// scan. Parent nodes are not required to exist before a create; the
/// progress and backlog stores always `mkdirp` their layout first.
#[derive(Debug, Default)]
pub struct MemoryCoordinator {
    nodes: RwLock<BTreeMap<String, Stored>>,
}

impl MemoryCoordinator {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes currently stored.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    fn normalize(path: &str) -> Result<String, CoordinatorError> {
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
            return Err(CoordinatorError::Backend(format!("invalid path: {path}")));
        }
        Ok(path.to_string())
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinatorError> {
        let path = Self::normalize(path)?;
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&path) {
            return Err(CoordinatorError::AlreadyExists(path));
        }
        nodes.insert(
            path,
            Stored {
                data: data.to_vec(),
                version: 0,
            },
        );
        Ok(())
    }

    async fn set(
        &self,
        path: &str,
        data: &[u8],
        version: Option<u64>,
    ) -> Result<(), CoordinatorError> {
        let path = Self::normalize(path)?;
        let mut nodes = self.nodes.write();
        match (nodes.get_mut(&path), version) {
            (Some(node), Some(expected)) if node.version != expected => {
                Err(CoordinatorError::Conflict {
                    path,
                    expected,
                    actual: node.version,
                })
            }
            (Some(node), _) => {
                node.data = data.to_vec();
                node.version += 1;
                Ok(())
            }
            (None, Some(_)) => Err(CoordinatorError::NotFound(path)),
            (None, None) => {
                nodes.insert(
                    path,
                    Stored {
                        data: data.to_vec(),
                        version: 0,
                    },
                );
                Ok(())
            }
        }
    }

    async fn get(&self, path: &str) -> Result<Node, CoordinatorError> {
        let path = Self::normalize(path)?;
        let nodes = self.nodes.read();
        nodes
            .get(&path)
            .map(|stored| Node {
                data: stored.data.clone(),
                version: stored.version,
            })
            .ok_or(CoordinatorError::NotFound(path))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinatorError> {
        let path = Self::normalize(path)?;
        let nodes = self.nodes.read();
        if !nodes.contains_key(&path) {
            return Err(CoordinatorError::NotFound(path));
        }
        let prefix = format!("{path}/");
        let mut names = Vec::new();
        for key in nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| &k[prefix.len()..])
        {
            // Direct children only.
            if !key.contains('/') {
                names.push(key.to_string());
            }
        }
        Ok(names)
    }

    async fn mkdirp(&self, path: &str) -> Result<(), CoordinatorError> {
        let path = Self::normalize(path)?;
        let mut nodes = self.nodes.write();
        let mut current = String::new();
        for segment in path.split('/').skip(1) {
            current.push('/');
            current.push_str(segment);
            nodes.entry(current.clone()).or_insert_with(|| Stored {
                data: Vec::new(),
                version: 0,
            });
        }
        Ok(())
    }
}
