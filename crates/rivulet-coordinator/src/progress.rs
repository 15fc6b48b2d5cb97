//! Durable per-bucket ingestion progress.
//!
//! Layout under the ingestion root, one subtree per target bucket:
//!
//! ```text
//! <root>/<target>/init/isStatusComplete     bool
//! <root>/<target>/init/keyMarker            string | null
//! <root>/<target>/init/versionMarker        string | null
//! <root>/<target>/logState/raft_<id>/logOffset   integer
//! ```
//!
//! Node values are JSON scalars. Paths are created lazily and never
//! deleted by the reader. Every write goes through the Coordinator's
//! compare-and-set discipline; a lost race surfaces as
//! [`CoordinatorError::Conflict`] and the batch is retried on the next
//! tick rather than silently dropped.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use rivulet_core::state::InitState;

use crate::error::CoordinatorError;
use crate::store::Coordinator;

/// First sequence number of a source partition's log.
pub const INITIAL_LOG_OFFSET: u64 = 1;

/// Progress store for one target bucket.
pub struct ProgressStore {
    coordinator: Arc<dyn Coordinator>,
    base: String,
    raft_id: Option<u64>,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("base", &self.base)
            .field("raft_id", &self.raft_id)
            .finish_non_exhaustive()
    }
}

impl ProgressStore {
    /// Creates a store rooted at `<root>/<target>`.
    #[must_use]
    pub fn new(coordinator: Arc<dyn Coordinator>, root: &str, target: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            coordinator,
            base: format!("{root}/{target}"),
            raft_id: None,
        }
    }

    /// Binds the store to the bucket's log partition.
    ///
    /// The raft id is set exactly once per bucket: an id already recorded
    /// on the Coordinator wins over a freshly resolved one, so a partition
    /// remap on the source cannot silently reset offsets.
    ///
    /// # Errors
    ///
    /// Propagates Coordinator failures.
    pub async fn setup_raft_id(&mut self, resolved: u64) -> Result<u64, CoordinatorError> {
        let log_state = format!("{}/logState", self.base);
        self.coordinator.mkdirp(&log_state).await?;

        let existing = self
            .coordinator
            .children(&log_state)
            .await?
            .iter()
            .find_map(|name| name.strip_prefix("raft_")?.parse::<u64>().ok());

        let raft_id = match existing {
            Some(stored) => {
                if stored != resolved {
                    warn!(
                        base = %self.base,
                        stored,
                        resolved,
                        "stored raft id differs from lookup, keeping stored"
                    );
                }
                stored
            }
            None => {
                self.coordinator
                    .mkdirp(&format!("{log_state}/raft_{resolved}"))
                    .await?;
                info!(base = %self.base, raft_id = resolved, "bound bucket to log partition");
                resolved
            }
        };

        self.raft_id = Some(raft_id);
        Ok(raft_id)
    }

    /// The bound raft id, if [`Self::setup_raft_id`] has run.
    #[must_use]
    pub fn raft_id(&self) -> Option<u64> {
        self.raft_id
    }

    /// Reads the snapshot-phase state, creating absent nodes as `null`.
    ///
    /// # Errors
    ///
    /// Propagates Coordinator failures.
    pub async fn read_init(&self) -> Result<InitState, CoordinatorError> {
        self.coordinator
            .mkdirp(&format!("{}/init", self.base))
            .await?;
        let is_status_complete = self
            .read_or_init::<bool>(&self.init_path("isStatusComplete"))
            .await?
            .unwrap_or(false);
        let key_marker = self
            .read_or_init::<String>(&self.init_path("keyMarker"))
            .await?;
        let version_marker = self
            .read_or_init::<String>(&self.init_path("versionMarker"))
            .await?;
        Ok(InitState {
            is_status_complete,
            key_marker,
            version_marker,
        })
    }

    /// Persists the snapshot-phase state (all three nodes).
    ///
    /// # Errors
    ///
    /// Propagates Coordinator failures, including CAS conflicts.
    pub async fn write_init(&self, state: &InitState) -> Result<(), CoordinatorError> {
        self.write_json(&self.init_path("isStatusComplete"), &state.is_status_complete)
            .await?;
        self.write_json(&self.init_path("keyMarker"), &state.key_marker)
            .await?;
        self.write_json(&self.init_path("versionMarker"), &state.version_marker)
            .await?;
        debug!(base = %self.base, complete = state.is_status_complete, "persisted init state");
        Ok(())
    }

    /// Reads the next log sequence to consume, creating the node at the
    /// partition's first sequence when absent.
    ///
    /// # Errors
    ///
    /// Propagates Coordinator failures; fails if the raft id is unbound.
    pub async fn read_log_offset(&self) -> Result<u64, CoordinatorError> {
        let path = self.log_offset_path()?;
        match self.read_or_create(&path, &INITIAL_LOG_OFFSET).await? {
            Some(offset) => Ok(offset),
            None => Ok(INITIAL_LOG_OFFSET),
        }
    }

    /// Advances the log offset; writes only when strictly increasing.
    ///
    /// # Errors
    ///
    /// Propagates Coordinator failures, including CAS conflicts.
    pub async fn write_log_offset(&self, next: u64) -> Result<(), CoordinatorError> {
        let path = self.log_offset_path()?;
        match self.coordinator.get(&path).await {
            Ok(node) => {
                let current: u64 = decode(&path, &node.data)?.unwrap_or(INITIAL_LOG_OFFSET);
                if next <= current {
                    return Ok(());
                }
                let value = encode(&next);
                self.coordinator
                    .set(&path, &value, Some(node.version))
                    .await?;
            }
            Err(CoordinatorError::NotFound(_)) => {
                self.coordinator.create(&path, &encode(&next)).await?;
            }
            Err(e) => return Err(e),
        }
        debug!(base = %self.base, offset = next, "advanced log offset");
        Ok(())
    }

    fn init_path(&self, name: &str) -> String {
        format!("{}/init/{name}", self.base)
    }

    fn log_offset_path(&self) -> Result<String, CoordinatorError> {
        let raft_id = self.raft_id.ok_or_else(|| {
            CoordinatorError::Backend(format!("{}: raft id not bound", self.base))
        })?;
        Ok(format!("{}/logState/raft_{raft_id}/logOffset", self.base))
    }

    /// Gets a node, creating it as JSON `null` when absent.
    async fn read_or_init<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, CoordinatorError> {
        match self.coordinator.get(path).await {
            Ok(node) => decode(path, &node.data),
            Err(CoordinatorError::NotFound(_)) => {
                match self.coordinator.create(path, b"null").await {
                    Ok(()) | Err(CoordinatorError::AlreadyExists(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Gets a node, creating it with `initial` when absent.
    async fn read_or_create<T: Serialize + DeserializeOwned>(
        &self,
        path: &str,
        initial: &T,
    ) -> Result<Option<T>, CoordinatorError> {
        match self.coordinator.get(path).await {
            Ok(node) => decode(path, &node.data),
            Err(CoordinatorError::NotFound(_)) => {
                match self.coordinator.create(path, &encode(initial)).await {
                    Ok(()) | Err(CoordinatorError::AlreadyExists(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Read-modify CAS write of a JSON scalar, creating when absent.
    async fn write_json<T: Serialize>(
        &self,
        path: &str,
        value: &T,
    ) -> Result<(), CoordinatorError> {
        let data = encode(value);
        match self.coordinator.get(path).await {
            Ok(node) => self.coordinator.set(path, &data, Some(node.version)).await,
            Err(CoordinatorError::NotFound(_)) => self.coordinator.create(path, &data).await,
            Err(e) => Err(e),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    // JSON scalars never fail to serialize.
    serde_json::to_vec(value).unwrap_or_default()
}

fn decode<T: DeserializeOwned>(path: &str, data: &[u8]) -> Result<Option<T>, CoordinatorError> {
    if data.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice::<Option<T>>(data).map_err(|source| CoordinatorError::Decode {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCoordinator;

    fn store() -> ProgressStore {
        ProgressStore::new(Arc::new(MemoryCoordinator::new()), "/rivulet/ingestion", "t1")
    }

    #[tokio::test]
    async fn test_setup_raft_id_first_binding_wins() {
        let mut progress = store();
        assert_eq!(progress.setup_raft_id(3).await.unwrap(), 3);
        // A later lookup returning a different partition keeps the stored id.
        assert_eq!(progress.setup_raft_id(9).await.unwrap(), 3);
        assert_eq!(progress.raft_id(), Some(3));
    }

    #[tokio::test]
    async fn test_read_init_creates_absent_nodes() {
        let progress = store();
        let state = progress.read_init().await.unwrap();
        assert_eq!(state, InitState::default());
        // Second read goes through the now-existing nodes.
        let again = progress.read_init().await.unwrap();
        assert_eq!(again, InitState::default());
    }

    #[tokio::test]
    async fn test_init_round_trip() {
        let progress = store();
        let state = InitState {
            is_status_complete: false,
            key_marker: Some("obj-042".into()),
            version_marker: Some("v7".into()),
        };
        progress.write_init(&state).await.unwrap();
        assert_eq!(progress.read_init().await.unwrap(), state);

        let done = InitState {
            is_status_complete: true,
            key_marker: None,
            version_marker: None,
        };
        progress.write_init(&done).await.unwrap();
        assert_eq!(progress.read_init().await.unwrap(), done);
    }

    #[tokio::test]
    async fn test_log_offset_defaults_to_initial() {
        let mut progress = store();
        progress.setup_raft_id(1).await.unwrap();
        assert_eq!(progress.read_log_offset().await.unwrap(), INITIAL_LOG_OFFSET);
    }

    #[tokio::test]
    async fn test_log_offset_only_moves_forward() {
        let mut progress = store();
        progress.setup_raft_id(1).await.unwrap();
        progress.write_log_offset(7).await.unwrap();
        assert_eq!(progress.read_log_offset().await.unwrap(), 7);
        progress.write_log_offset(5).await.unwrap();
        assert_eq!(progress.read_log_offset().await.unwrap(), 7);
        progress.write_log_offset(10).await.unwrap();
        assert_eq!(progress.read_log_offset().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_log_offset_requires_binding() {
        let progress = store();
        assert!(progress.read_log_offset().await.is_err());
        assert!(progress.write_log_offset(5).await.is_err());
    }
}
