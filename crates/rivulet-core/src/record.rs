//! Raft-log record model and the key rewrite rules.
//!
//! The source cluster's log-read endpoint returns
//! `{info: {start, cseq, prune}, log: [{db?, entries: [...]}, ...]}`.
//! Before a record's entries are handed to the filters, its keys are
//! rewritten so that well-known container records point at the target
//! bucket instead of the source one.

use serde::{Deserialize, Serialize};

use crate::event::{EventKind, METASTORE_BUCKET, USERS_BUCKET, USERS_KEY_SEP};

/// Header of a log-read response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogInfo {
    /// Sequence number of the first record in the response; `None` when
    /// the read produced no records (no such partition, or range not yet
    /// available).
    pub start: Option<u64>,
    /// Current head of the log at read time.
    pub cseq: Option<u64>,
    /// Oldest sequence still retained.
    pub prune: Option<u64>,
}

/// One mutation inside a log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Mutation kind; absent on legacy put-style entries.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventKind>,
    /// Object key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Entry payload; a JSON object or string depending on the source
    /// container. Absent for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl LogEntry {
    /// Mutation kind with the legacy default applied.
    #[must_use]
    pub fn kind_or_default(&self) -> EventKind {
        self.kind.unwrap_or_default()
    }

    /// Entry payload as an opaque string, the form events carry.
    #[must_use]
    pub fn value_string(&self) -> Option<String> {
        self.value.as_ref().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// A batch of entries committed together on one source container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Source container the batch was committed on; absent on legacy
    /// put-style records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    /// Entries in commit order.
    #[serde(default)]
    pub entries: Vec<LogEntry>,
}

impl LogRecord {
    /// Rewrites the record's keys and container for the target bucket.
    ///
    /// - users-bucket records: the bucket-name suffix after `..|..` is
    ///   replaced with `target`;
    /// - metastore records: the suffix after the last `/` is replaced
    ///   with `target`;
    /// - anything else: keys pass through and `db` becomes `target`.
    ///
    /// Rewrite happens before filtering, so filters see rewritten keys.
    pub fn rewrite_for(&mut self, target: &str) {
        match self.db.as_deref() {
            Some(USERS_BUCKET) => {
                for entry in &mut self.entries {
                    if let Some(key) = entry.key.take() {
                        entry.key = Some(rewrite_suffix(&key, USERS_KEY_SEP, target));
                    }
                }
            }
            Some(METASTORE_BUCKET) => {
                for entry in &mut self.entries {
                    if let Some(key) = entry.key.take() {
                        entry.key = Some(rewrite_suffix(&key, "/", target));
                    }
                }
            }
            _ => {
                self.db = Some(target.to_string());
            }
        }
    }

    /// Whether this record should produce events for `source_bucket`.
    ///
    /// Only records committed on the source bucket itself or on one of
    /// the two well-known containers pass.
    #[must_use]
    pub fn matches(&self, source_bucket: &str) -> bool {
        match self.db.as_deref() {
            Some(db) => db == source_bucket || db == USERS_BUCKET || db == METASTORE_BUCKET,
            // Legacy records carry no db and always pass.
            None => true,
        }
    }
}

/// Replaces everything after the last occurrence of `sep` with `target`.
///
/// A key without the separator is passed through unchanged.
fn rewrite_suffix(key: &str, sep: &str, target: &str) -> String {
    match key.rfind(sep) {
        Some(idx) => format!("{}{}{}", &key[..idx], sep, target),
        None => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> LogEntry {
        LogEntry {
            kind: None,
            key: Some(key.to_string()),
            value: None,
        }
    }

    #[test]
    fn test_users_bucket_rewrite() {
        let mut rec = LogRecord {
            db: Some(USERS_BUCKET.to_string()),
            entries: vec![entry("owner1..|..bucket1")],
        };
        rec.rewrite_for("zenko-bucket1");
        assert_eq!(rec.entries[0].key.as_deref(), Some("owner1..|..zenko-bucket1"));
        assert_eq!(rec.db.as_deref(), Some(USERS_BUCKET));
    }

    #[test]
    fn test_metastore_rewrite() {
        let mut rec = LogRecord {
            db: Some(METASTORE_BUCKET.to_string()),
            entries: vec![entry("md/bucket1")],
        };
        rec.rewrite_for("zenko-bucket1");
        assert_eq!(rec.entries[0].key.as_deref(), Some("md/zenko-bucket1"));
    }

    #[test]
    fn test_plain_record_db_replaced() {
        let mut rec = LogRecord {
            db: Some("bucket1".to_string()),
            entries: vec![entry("object1")],
        };
        rec.rewrite_for("zenko-bucket1");
        assert_eq!(rec.db.as_deref(), Some("zenko-bucket1"));
        assert_eq!(rec.entries[0].key.as_deref(), Some("object1"));
    }

    #[test]
    fn test_legacy_record_gains_target_db() {
        let mut rec = LogRecord {
            db: None,
            entries: vec![entry("object1")],
        };
        rec.rewrite_for("zenko-bucket1");
        assert_eq!(rec.db.as_deref(), Some("zenko-bucket1"));
    }

    #[test]
    fn test_matches_source_and_special_containers() {
        let on = |db: Option<&str>| LogRecord {
            db: db.map(String::from),
            entries: vec![],
        };
        assert!(on(Some("bucket1")).matches("bucket1"));
        assert!(on(Some(USERS_BUCKET)).matches("bucket1"));
        assert!(on(Some(METASTORE_BUCKET)).matches("bucket1"));
        assert!(on(None).matches("bucket1"));
        assert!(!on(Some("other")).matches("bucket1"));
    }

    #[test]
    fn test_entry_kind_default_is_put() {
        let e: LogEntry = serde_json::from_str(r#"{"key":"k"}"#).unwrap();
        assert_eq!(e.kind, None);
        assert_eq!(e.kind_or_default(), EventKind::Put);
    }

    #[test]
    fn test_entry_value_string_forms() {
        let s: LogEntry = serde_json::from_str(r#"{"key":"k","value":"raw"}"#).unwrap();
        assert_eq!(s.value_string().as_deref(), Some("raw"));
        let obj: LogEntry = serde_json::from_str(r#"{"key":"k","value":{"a":1}}"#).unwrap();
        assert_eq!(obj.value_string().as_deref(), Some(r#"{"a":1}"#));
        let none: LogEntry = serde_json::from_str(r#"{"key":"k"}"#).unwrap();
        assert_eq!(none.value_string(), None);
    }

    #[test]
    fn test_info_defaults_to_empty() {
        let info: LogInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(info, LogInfo::default());
        assert!(info.start.is_none());
    }

    #[test]
    fn test_record_deserializes_without_entries() {
        let rec: LogRecord = serde_json::from_str(r#"{"db":"b"}"#).unwrap();
        assert!(rec.entries.is_empty());
    }
}
