//! Mock connectors for tests.
//!
//! [`MockSourceApi`] mimics a source cluster well enough to drive the
//! snapshot and tail paths end to end, including the streaming record
//! parser: log reads synthesize a real JSON body and feed it through
//! [`LogRecordStream`]. [`MockEventBus`] records published batches and
//! can inject delivery failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rivulet_core::record::{LogInfo, LogRecord};

use crate::bus::{BusEntry, EventBus};
use crate::client::{ListPage, ListedObject, SourceApi};
use crate::error::{BusError, SourceError};
use crate::stream::LogRecordStream;

#[derive(Default)]
struct MockSourceState {
    objects: BTreeMap<String, serde_json::Value>,
    vanished: Vec<String>,
    records: BTreeMap<u64, LogRecord>,
    cseq: u64,
}

/// In-memory source cluster.
pub struct MockSourceApi {
    partition: u64,
    state: Mutex<MockSourceState>,
}

impl MockSourceApi {
    /// A source whose bucket lives on `partition`.
    #[must_use]
    pub fn new(partition: u64) -> Self {
        Self {
            partition,
            state: Mutex::new(MockSourceState::default()),
        }
    }

    /// Stores an object with its metadata.
    pub fn put_object(&self, key: &str, metadata: serde_json::Value) {
        self.state.lock().objects.insert(key.to_string(), metadata);
    }

    /// Lists an object whose metadata fetch will 404.
    pub fn put_vanished_object(&self, key: &str) {
        self.state.lock().vanished.push(key.to_string());
    }

    /// Appends a record at `seq`, advancing the log head.
    pub fn push_log_record(&self, seq: u64, record: LogRecord) {
        let mut state = self.state.lock();
        state.records.insert(seq, record);
        state.cseq = state.cseq.max(seq);
    }

    /// Pins the log head without appending records.
    pub fn set_cseq(&self, cseq: u64) {
        self.state.lock().cseq = cseq;
    }
}

#[async_trait]
impl SourceApi for MockSourceApi {
    async fn lookup_partition(&self, _bucket: &str) -> Result<u64, SourceError> {
        Ok(self.partition)
    }

    async fn list_objects(
        &self,
        _bucket: &str,
        key_marker: Option<&str>,
        _version_marker: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, SourceError> {
        let state = self.state.lock();
        let mut keys: Vec<String> = state
            .objects
            .keys()
            .chain(state.vanished.iter())
            .cloned()
            .collect();
        keys.sort();
        let keys: Vec<String> = keys
            .into_iter()
            .filter(|k| key_marker.is_none_or(|m| k.as_str() > m))
            .collect();
        let truncated = keys.len() > max_keys;
        let page: Vec<String> = keys.into_iter().take(max_keys).collect();
        Ok(ListPage {
            next_key_marker: truncated.then(|| page.last().cloned()).flatten(),
            next_version_marker: None,
            is_truncated: truncated,
            contents: page.into_iter().map(|key| ListedObject { key }).collect(),
        })
    }

    async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<serde_json::Value, SourceError> {
        self.state.lock().objects.get(key).cloned().ok_or(
            SourceError::MissingMetadata {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
        )
    }

    async fn read_log(
        &self,
        partition: u64,
        begin: u64,
        end: u64,
        _target_leader: bool,
    ) -> Result<LogRecordStream, SourceError> {
        if partition != self.partition {
            return Ok(LogRecordStream::empty());
        }
        let state = self.state.lock();
        let window: Vec<(u64, &LogRecord)> = state
            .records
            .range(begin..end)
            .map(|(&seq, record)| (seq, record))
            .collect();
        if window.is_empty() && begin > state.cseq {
            // Range not yet available.
            return Ok(LogRecordStream::empty());
        }
        let info = LogInfo {
            start: window.first().map(|&(seq, _)| seq),
            cseq: Some(state.cseq),
            prune: Some(1),
        };
        let records: Vec<&LogRecord> = window.into_iter().map(|(_, r)| r).collect();
        let body = serde_json::json!({ "info": info, "log": records }).to_string();
        let chunks = futures::stream::once(async move { Ok(Bytes::from(body)) });
        Ok(LogRecordStream::new(Box::pin(chunks)))
    }
}

/// In-memory event bus recording published batches.
#[derive(Default)]
pub struct MockEventBus {
    batches: Mutex<Vec<(String, Vec<BusEntry>)>>,
    failures: AtomicUsize,
}

impl MockEventBus {
    /// A bus that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` publishes fail.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// All batches published so far.
    #[must_use]
    pub fn batches(&self) -> Vec<(String, Vec<BusEntry>)> {
        self.batches.lock().clone()
    }

    /// All entries published so far, flattened in publish order.
    #[must_use]
    pub fn entries(&self) -> Vec<BusEntry> {
        self.batches
            .lock()
            .iter()
            .flat_map(|(_, entries)| entries.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl EventBus for MockEventBus {
    async fn publish(
        &self,
        topic: &str,
        entries: &[BusEntry],
        _timeout: Duration,
    ) -> Result<(), BusError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.batches
            .lock()
            .push((topic.to_string(), entries.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_list_pagination() {
        let source = MockSourceApi::new(1);
        for key in ["a", "b", "c"] {
            source.put_object(key, serde_json::json!({}));
        }
        let first = source.list_objects("b", None, None, 2).await.unwrap();
        assert_eq!(first.contents.len(), 2);
        assert!(first.is_truncated);
        assert_eq!(first.next_key_marker.as_deref(), Some("b"));

        let rest = source.list_objects("b", Some("b"), None, 2).await.unwrap();
        assert_eq!(rest.contents.len(), 1);
        assert!(!rest.is_truncated);
        assert_eq!(rest.contents[0].key, "c");
    }

    #[tokio::test]
    async fn test_mock_read_log_window() {
        let source = MockSourceApi::new(1);
        for seq in 7..=9 {
            source.push_log_record(
                seq,
                LogRecord {
                    db: Some("b".into()),
                    entries: vec![],
                },
            );
        }
        let mut stream = source.read_log(1, 7, 9, false).await.unwrap();
        let info = stream.info().await.unwrap();
        assert_eq!(info.start, Some(7));
        assert_eq!(info.cseq, Some(9));
        let mut count = 0;
        while stream.next_record().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_mock_read_log_past_head_is_empty() {
        let source = MockSourceApi::new(1);
        source.set_cseq(9);
        let mut stream = source.read_log(1, 10, 20, false).await.unwrap();
        assert_eq!(stream.info().await.unwrap().start, None);
        assert!(stream.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_read_log_header_carries_cseq_without_records() {
        let source = MockSourceApi::new(1);
        source.set_cseq(7);
        let mut stream = source.read_log(1, 1, 2, false).await.unwrap();
        let info = stream.info().await.unwrap();
        assert_eq!(info.start, None);
        assert_eq!(info.cseq, Some(7));
    }

    #[tokio::test]
    async fn test_mock_bus_failure_injection() {
        let bus = MockEventBus::new();
        bus.fail_next(1);
        let entries = vec![BusEntry {
            key: "k".into(),
            value: "v".into(),
        }];
        assert!(bus.publish("T", &entries, Duration::from_secs(1)).await.is_err());
        bus.publish("T", &entries, Duration::from_secs(1)).await.unwrap();
        assert_eq!(bus.batches().len(), 1);
    }
}
