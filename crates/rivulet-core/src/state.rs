//! Per-bucket ingestion progress.
//!
//! The snapshot phase advances through [`InitState`] until it reports
//! complete; from then on only the log offset moves. The tuple is held
//! durably on the Coordinator and passed through the snapshot producer
//! when resuming.

use serde::{Deserialize, Serialize};

/// Snapshot-phase progress for one bucket.
///
/// When `is_status_complete` is `true` the markers are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitState {
    /// Whether the snapshot phase has finished.
    pub is_status_complete: bool,
    /// Key continuation token for snapshot resumption.
    pub key_marker: Option<String>,
    /// Version continuation token for snapshot resumption.
    pub version_marker: Option<String>,
}

impl InitState {
    /// Whether this state resumes a snapshot already underway.
    #[must_use]
    pub fn is_resumption(&self) -> bool {
        !self.is_status_complete
            && (self.key_marker.is_some() || self.version_marker.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fresh() {
        let state = InitState::default();
        assert!(!state.is_status_complete);
        assert!(!state.is_resumption());
    }

    #[test]
    fn test_markers_mean_resumption() {
        let state = InitState {
            is_status_complete: false,
            key_marker: Some("k".into()),
            version_marker: None,
        };
        assert!(state.is_resumption());
    }

    #[test]
    fn test_complete_state_is_not_resumption() {
        let state = InitState {
            is_status_complete: true,
            key_marker: Some("k".into()),
            version_marker: None,
        };
        assert!(!state.is_resumption());
    }
}
