//! Canonical events published on the message bus.
//!
//! Every mutation the pipeline discovers — whether replayed from a bucket
//! snapshot or tailed live from the raft log — is normalized into an
//! [`Event`] before it reaches the producer. Downstream materializers only
//! ever see this shape.

use serde::{Deserialize, Serialize};

/// Separator between an object key and its version id in composite keys.
pub const VID_SEP: char = '\0';

/// Well-known container holding one record per bucket an account owns.
pub const USERS_BUCKET: &str = "users..bucket";

/// Well-known container holding bucket metadata records.
pub const METASTORE_BUCKET: &str = "metastore";

/// Separator between the owner id and the bucket name in users-bucket keys.
pub(crate) const USERS_KEY_SEP: &str = "..|..";

/// Kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An object or bucket was created or overwritten.
    #[default]
    Put,
    /// An object or bucket was deleted.
    Del,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Put => write!(f, "put"),
            Self::Del => write!(f, "del"),
        }
    }
}

/// A canonical event, ready for the bus.
///
/// Serialized as `{"type": ..., "bucket": ..., "key": ..., "value": ...}`;
/// `value` is omitted for deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Mutation kind.
    #[serde(rename = "type", default)]
    pub kind: EventKind,
    /// Target bucket the event applies to. Never empty.
    pub bucket: String,
    /// Object key, version-tagged as `<key><VID_SEP><versionId>` for
    /// versioned entries.
    pub key: String,
    /// Opaque payload (JSON object metadata for puts; absent for deletes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Derives the target bucket name for a source bucket.
///
/// Many source tenants share one target catalog; prefixing the source
/// bucket with the configured display name keeps their namespaces apart.
#[must_use]
pub fn target_bucket(prefix: &str, source_bucket: &str) -> String {
    format!("{prefix}-{source_bucket}")
}

impl Event {
    /// Synthetic put for an object discovered during snapshot or tail.
    ///
    /// `metadata` is the object's serialized metadata; it travels opaquely
    /// in `value`.
    #[must_use]
    pub fn object_put(
        metadata: impl Into<String>,
        key: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Put,
            bucket: target.into(),
            key: key.into(),
            value: Some(metadata.into()),
        }
    }

    /// Put recording that `bucket` exists under `owner_id`, as listed in
    /// the users bucket.
    #[must_use]
    pub fn bucket_listing_put(
        owner_id: &str,
        bucket: &str,
        creation_date: impl Into<String>,
        prefix: &str,
    ) -> Self {
        let target = target_bucket(prefix, bucket);
        Self {
            kind: EventKind::Put,
            bucket: USERS_BUCKET.to_string(),
            key: format!("{owner_id}{USERS_KEY_SEP}{target}"),
            value: Some(creation_date.into()),
        }
    }

    /// Put carrying a bucket's own metadata record.
    #[must_use]
    pub fn bucket_metadata_put(
        bucket: &str,
        serialized_metadata: impl Into<String>,
        prefix: &str,
    ) -> Self {
        let target = target_bucket(prefix, bucket);
        Self {
            kind: EventKind::Put,
            bucket: target.clone(),
            key: target,
            value: Some(serialized_metadata.into()),
        }
    }

    /// Whether the key carries a version id.
    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.key.contains(VID_SEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_put_shape() {
        let ev = Event::object_put(r#"{"size":12}"#, "object1", "zenkobucket-bucket1");
        assert_eq!(ev.kind, EventKind::Put);
        assert_eq!(ev.bucket, "zenkobucket-bucket1");
        assert_eq!(ev.key, "object1");
        assert_eq!(ev.value.as_deref(), Some(r#"{"size":12}"#));
    }

    #[test]
    fn test_bucket_listing_put_key_format() {
        let ev = Event::bucket_listing_put("owner1", "b1", "2024-01-01T00:00:00Z", "zenko");
        assert_eq!(ev.bucket, USERS_BUCKET);
        assert_eq!(ev.key, "owner1..|..zenko-b1");
        assert_eq!(ev.value.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_bucket_metadata_put_bucket_equals_key() {
        let ev = Event::bucket_metadata_put("b1", "{}", "zenko");
        assert_eq!(ev.bucket, "zenko-b1");
        assert_eq!(ev.key, "zenko-b1");
    }

    #[test]
    fn test_serialize_omits_absent_value() {
        let ev = Event {
            kind: EventKind::Del,
            bucket: "b".into(),
            key: "k".into(),
            value: None,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"type":"del","bucket":"b","key":"k"}"#);
    }

    #[test]
    fn test_deserialize_defaults_kind_to_put() {
        let ev: Event = serde_json::from_str(r#"{"bucket":"b","key":"k"}"#).unwrap();
        assert_eq!(ev.kind, EventKind::Put);
    }

    #[test]
    fn test_is_versioned() {
        let plain = Event::object_put("{}", "key", "t");
        assert!(!plain.is_versioned());
        let versioned = Event::object_put("{}", format!("key{VID_SEP}v1"), "t");
        assert!(versioned.is_versioned());
    }

    #[test]
    fn test_target_bucket() {
        assert_eq!(target_bucket("zenkobucket", "bucket1"), "zenkobucket-bucket1");
    }
}
