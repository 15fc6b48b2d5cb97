//! Tail producer: bounded windows over a partition's live log.

use std::sync::Arc;

use tracing::debug;

use crate::client::SourceApi;
use crate::error::SourceError;
use crate::stream::LogRecordStream;

/// Produces log-record streams for one bucket's partition.
pub struct TailProducer {
    source: Arc<dyn SourceApi>,
}

impl std::fmt::Debug for TailProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailProducer").finish_non_exhaustive()
    }
}

impl TailProducer {
    /// Creates a producer over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn SourceApi>) -> Self {
        Self { source }
    }

    /// Opens a stream over `[start_seq, start_seq + limit)`.
    ///
    /// Reads go to any replica (`target_leader = false`); an unavailable
    /// window resolves as an empty stream, not an error.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn produce(
        &self,
        partition: u64,
        start_seq: u64,
        limit: u64,
    ) -> Result<LogRecordStream, SourceError> {
        debug!(partition, start_seq, limit, "opening tail window");
        self.source
            .read_log(partition, start_seq, start_seq + limit, false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSourceApi;
    use rivulet_core::record::LogRecord;

    #[tokio::test]
    async fn test_window_is_bounded_by_limit() {
        let source = Arc::new(MockSourceApi::new(2));
        for seq in 1..=10 {
            source.push_log_record(
                seq,
                LogRecord {
                    db: Some("b".into()),
                    entries: vec![],
                },
            );
        }
        let producer = TailProducer::new(source);
        let mut stream = producer.produce(2, 4, 3).await.unwrap();
        assert_eq!(stream.info().await.unwrap().start, Some(4));
        let mut count = 0;
        while stream.next_record().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_window_past_head_is_empty() {
        let source = Arc::new(MockSourceApi::new(2));
        source.set_cseq(9);
        let producer = TailProducer::new(source);
        let mut stream = producer.produce(2, 10, 5).await.unwrap();
        assert_eq!(stream.info().await.unwrap().start, None);
        assert!(stream.next_record().await.unwrap().is_none());
    }
}
