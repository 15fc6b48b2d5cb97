//! Plug-in filters and the per-batch staging area.
//!
//! The ingestion reader feeds every prepared entry through a list of
//! extensions. Each extension may stage zero or more canonical events
//! into the [`EntryBatch`]; whatever is staged when the batch closes is
//! what gets published. The batch value is owned by the reader and lives
//! for exactly one cycle, so staged events can never leak across batches.

use std::collections::HashMap;

use crate::event::Event;

/// Per-batch staging area: target bucket → ordered events.
///
/// Insertion order is preserved both within a bucket and across buckets,
/// so the publish step replays events exactly as the source produced them.
#[derive(Debug, Default)]
pub struct EntryBatch {
    order: Vec<String>,
    staged: HashMap<String, Vec<Event>>,
}

impl EntryBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an event under its target bucket.
    pub fn push(&mut self, event: Event) {
        let bucket = event.bucket.clone();
        match self.staged.get_mut(&bucket) {
            Some(events) => events.push(event),
            None => {
                self.order.push(bucket.clone());
                self.staged.insert(bucket, vec![event]);
            }
        }
    }

    /// Total number of staged events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.values().map(Vec::len).sum()
    }

    /// Whether nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Staged events for one target bucket.
    #[must_use]
    pub fn events_for(&self, bucket: &str) -> &[Event] {
        self.staged.get(bucket).map_or(&[], Vec::as_slice)
    }

    /// Drains the batch in staging order.
    #[must_use]
    pub fn into_events(mut self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.len());
        for bucket in self.order {
            if let Some(staged) = self.staged.remove(&bucket) {
                events.extend(staged);
            }
        }
        events
    }
}

/// A plug-in filter over prepared entries.
///
/// Implementations inspect each canonical entry and stage whatever events
/// their downstream consumer needs. The batch handle is scoped to the
/// current cycle.
pub trait Extension: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Inspects one entry, staging zero or more events.
    fn filter(&self, entry: &Event, batch: &mut EntryBatch);
}

/// The built-in extension: stages every entry verbatim.
///
/// This is what turns the ingestion reader's own entries into published
/// events; additional extensions ride alongside it.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestionExtension;

impl Extension for IngestionExtension {
    fn name(&self) -> &str {
        "ingestion"
    }

    fn filter(&self, entry: &Event, batch: &mut EntryBatch) {
        batch.push(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn event(bucket: &str, key: &str) -> Event {
        Event {
            kind: EventKind::Put,
            bucket: bucket.into(),
            key: key.into(),
            value: None,
        }
    }

    #[test]
    fn test_push_preserves_order_within_bucket() {
        let mut batch = EntryBatch::new();
        batch.push(event("b1", "k1"));
        batch.push(event("b1", "k2"));
        let keys: Vec<&str> = batch.events_for("b1").iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["k1", "k2"]);
    }

    #[test]
    fn test_into_events_preserves_bucket_insertion_order() {
        let mut batch = EntryBatch::new();
        batch.push(event("b2", "k1"));
        batch.push(event("b1", "k2"));
        batch.push(event("b2", "k3"));
        let flat: Vec<String> = batch
            .into_events()
            .into_iter()
            .map(|e| format!("{}/{}", e.bucket, e.key))
            .collect();
        assert_eq!(flat, ["b2/k1", "b2/k3", "b1/k2"]);
    }

    #[test]
    fn test_len_and_is_empty() {
        let mut batch = EntryBatch::new();
        assert!(batch.is_empty());
        batch.push(event("b", "k"));
        assert_eq!(batch.len(), 1);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_ingestion_extension_stages_verbatim() {
        let mut batch = EntryBatch::new();
        let ev = event("b", "k");
        IngestionExtension.filter(&ev, &mut batch);
        assert_eq!(batch.events_for("b"), &[ev]);
    }
}
