//! Typed client over the source cluster's extended S3-compatible API.
//!
//! All operations are stateless request/response over HTTP apart from
//! the shared keep-alive pool inside [`reqwest::Client`]. The trait is
//! the seam the producers and readers program against; tests substitute
//! [`crate::testing::MockSourceApi`].

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::config::SourceBucketConfig;
use crate::error::SourceError;
use crate::stream::LogRecordStream;

/// One page of a bucket listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPage {
    /// Listed objects, in key order.
    #[serde(rename = "Contents", default)]
    pub contents: Vec<ListedObject>,
    /// Whether more pages follow.
    #[serde(rename = "IsTruncated", default)]
    pub is_truncated: bool,
    /// Key continuation token for the next page.
    #[serde(rename = "NextKeyMarker", default)]
    pub next_key_marker: Option<String>,
    /// Version continuation token for the next page.
    #[serde(rename = "NextVersionIdMarker", default)]
    pub next_version_marker: Option<String>,
}

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListedObject {
    /// Object key, version-tagged for versioned entries.
    pub key: String,
}

/// Typed operations over the source bucket API.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Resolves which log partition carries `bucket`.
    ///
    /// # Errors
    ///
    /// [`SourceError::PartitionNotFound`] when the source knows no
    /// partition for the bucket; transport errors otherwise.
    async fn lookup_partition(&self, bucket: &str) -> Result<u64, SourceError>;

    /// Lists up to `max_keys` current object keys, resuming from the
    /// given continuation markers.
    ///
    /// # Errors
    ///
    /// Transport errors or an unexpected status.
    async fn list_objects(
        &self,
        bucket: &str,
        key_marker: Option<&str>,
        version_marker: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, SourceError>;

    /// Fetches one object's metadata.
    ///
    /// # Errors
    ///
    /// [`SourceError::MissingMetadata`] when the object vanished since
    /// listing; transport errors otherwise.
    async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<serde_json::Value, SourceError>;

    /// Opens a streaming read over a partition's log window
    /// `[begin, end)`.
    ///
    /// 404 (no such partition) and 416 (range not yet available) are not
    /// errors: both resolve to an empty stream whose header carries no
    /// start.
    ///
    /// # Errors
    ///
    /// Transport errors or an unexpected status.
    async fn read_log(
        &self,
        partition: u64,
        begin: u64,
        end: u64,
        target_leader: bool,
    ) -> Result<LogRecordStream, SourceError>;
}

/// HTTP implementation of [`SourceApi`].
pub struct HttpSourceClient {
    http: reqwest::Client,
    base: String,
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for HttpSourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSourceClient")
            .field("base", &self.base)
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl HttpSourceClient {
    /// Builds a client for one source endpoint.
    ///
    /// # Errors
    ///
    /// [`SourceError::Http`] if the underlying client cannot be built.
    pub fn new(config: &SourceBucketConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base: config.endpoint(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base))
            .basic_auth(&self.access_key, Some(&self.secret_key))
    }
}

#[async_trait]
impl SourceApi for HttpSourceClient {
    async fn lookup_partition(&self, bucket: &str) -> Result<u64, SourceError> {
        let response = self.get("/").query(&[("raftId", bucket)]).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::PartitionNotFound(bucket.to_string()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
                operation: "lookup_partition",
            });
        }
        let partitions: Vec<u64> = response.json().await?;
        debug!(bucket, ?partitions, "resolved log partition");
        partitions
            .first()
            .copied()
            .ok_or_else(|| SourceError::PartitionNotFound(bucket.to_string()))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        key_marker: Option<&str>,
        version_marker: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, SourceError> {
        let mut query: Vec<(&str, String)> = vec![
            ("list-type", "2".to_string()),
            ("max-keys", max_keys.to_string()),
        ];
        if let Some(marker) = key_marker {
            query.push(("key-marker", marker.to_string()));
        }
        if let Some(marker) = version_marker {
            query.push(("version-id-marker", marker.to_string()));
        }
        let response = self.get(&format!("/{bucket}")).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
                operation: "list_objects",
            });
        }
        Ok(response.json().await?)
    }

    async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<serde_json::Value, SourceError> {
        let response = self
            .get(&format!("/{bucket}/{key}"))
            .query(&[("metadata", "")])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::MissingMetadata {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
                operation: "get_object_metadata",
            });
        }
        Ok(response.json().await?)
    }

    async fn read_log(
        &self,
        partition: u64,
        begin: u64,
        end: u64,
        target_leader: bool,
    ) -> Result<LogRecordStream, SourceError> {
        let response = self
            .get("/_/raftLog")
            .query(&[
                ("logId", partition.to_string()),
                ("begin", begin.to_string()),
                ("end", end.to_string()),
                ("targetLeader", target_leader.to_string()),
            ])
            .send()
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE
        {
            debug!(partition, begin, end, status = status.as_u16(), "log window unavailable");
            return Ok(LogRecordStream::empty());
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                operation: "read_log",
            });
        }
        let chunks = response.bytes_stream().map_err(SourceError::from);
        Ok(LogRecordStream::new(Box::pin(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_page_wire_shape() {
        let page: ListPage = serde_json::from_str(
            r#"{"Contents":[{"key":"a"},{"key":"b"}],
                "IsTruncated":true,
                "NextKeyMarker":"b",
                "NextVersionIdMarker":"v2"}"#,
        )
        .unwrap();
        assert_eq!(page.contents.len(), 2);
        assert_eq!(page.contents[0].key, "a");
        assert!(page.is_truncated);
        assert_eq!(page.next_key_marker.as_deref(), Some("b"));
        assert_eq!(page.next_version_marker.as_deref(), Some("v2"));
    }

    #[test]
    fn test_list_page_minimal_shape() {
        let page: ListPage = serde_json::from_str(r#"{"Contents":[{"key":"a"}]}"#).unwrap();
        assert_eq!(page.contents.len(), 1);
        assert!(!page.is_truncated);
        assert!(page.next_key_marker.is_none());
    }

    #[test]
    fn test_client_builds_from_config() {
        let config = SourceBucketConfig {
            name: "zenko".into(),
            bucket: "b1".into(),
            host: "localhost".into(),
            port: 9000,
            https: false,
            location_constraint: None,
            access_key: "ak".into(),
            secret_key: "sk".into(),
        };
        let client = HttpSourceClient::new(&config).unwrap();
        assert_eq!(client.base, "http://localhost:9000");
    }
}
