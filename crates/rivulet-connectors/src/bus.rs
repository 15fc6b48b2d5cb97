//! Message-bus producer contract.
//!
//! The pipeline publishes ordered batches of keyed entries to a single
//! topic. Delivery is at-least-once with per-key ordering inside a
//! partition; a batch is all-or-nothing — any failed entry fails the
//! batch, the offset stays put, and the next cycle republishes.

use std::time::Duration;

use async_trait::async_trait;

use rivulet_core::event::Event;

use crate::error::BusError;

/// One keyed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEntry {
    /// Partitioning key.
    pub key: String,
    /// Serialized payload.
    pub value: String,
}

impl BusEntry {
    /// Builds the bus entry for a canonical event.
    ///
    /// The event key partitions the topic so per-object ordering holds;
    /// the payload is the event's JSON form.
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        Self {
            key: event.key.clone(),
            // Event serialization cannot fail: all fields are strings.
            value: serde_json::to_string(event).unwrap_or_default(),
        }
    }
}

/// An ordered, at-least-once batch producer.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes `entries` to `topic`, preserving order.
    ///
    /// # Errors
    ///
    /// [`BusError::Publish`] if any entry fails delivery within
    /// `timeout`; the caller treats the whole batch as unpublished.
    async fn publish(
        &self,
        topic: &str,
        entries: &[BusEntry],
        timeout: Duration,
    ) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::event::EventKind;

    #[test]
    fn test_entry_from_event() {
        let event = Event {
            kind: EventKind::Put,
            bucket: "zenko-b1".into(),
            key: "object1".into(),
            value: Some("{}".into()),
        };
        let entry = BusEntry::from_event(&event);
        assert_eq!(entry.key, "object1");
        assert_eq!(
            entry.value,
            r#"{"type":"put","bucket":"zenko-b1","key":"object1","value":"{}"}"#
        );
    }
}
