//! Process configuration and the secret boundary.
//!
//! The populator loads one JSON document at startup: a `queuePopulator`
//! section (Coordinator path, batch bound, tick rule) and a list of
//! source buckets whose `secretKey` is ciphertext at rest. Secrets are
//! decrypted exactly once, at the reader boundary; a source whose secret
//! fails to decrypt is refused, visibly, rather than started blind.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use rivulet_connectors::config::SourceBucketConfig;

/// Configuration failures, all fatal for the affected scope.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config read: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not the expected JSON shape.
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// A source's secret failed to decrypt; that reader must not start.
    #[error("secret for source {source_name}: {reason}")]
    Secret {
        /// Source name from the config file.
        source_name: String,
        /// Why decryption failed.
        reason: String,
    },
}

/// Decrypts source secrets at the reader boundary.
pub trait SecretDecryptor: Send + Sync {
    /// Decrypts one ciphertext secret.
    ///
    /// # Errors
    ///
    /// A human-readable reason; the caller attaches the source name.
    fn decrypt(&self, ciphertext: &str) -> Result<String, String>;
}

/// Standard-alphabet base64 secret codec.
///
/// The default at-rest encoding; deployments with a KMS substitute their
/// own [`SecretDecryptor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Decryptor;

impl SecretDecryptor for Base64Decryptor {
    fn decrypt(&self, ciphertext: &str) -> Result<String, String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|e| format!("invalid base64: {e}"))?;
        String::from_utf8(bytes).map_err(|e| format!("secret is not UTF-8: {e}"))
    }
}

/// Runtime pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Coordinator path the ingestion progress lives under.
    pub coordinator_root: String,
    /// Topic canonical events are published to.
    pub topic: String,
    /// Maximum log records read per batch cycle.
    pub batch_max_read: u64,
    /// Scheduler tick interval.
    pub tick_interval: Duration,
    /// Maximum batch cycles running concurrently across buckets.
    pub max_parallel_readers: usize,
    /// Bus publish timeout per batch.
    pub publish_timeout: Duration,
    /// Bound on concurrent metadata fetches within one snapshot page.
    pub metadata_fan_out: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            coordinator_root: "/rivulet/ingestion".to_string(),
            topic: "rivulet-ingestion".to_string(),
            batch_max_read: 10_000,
            tick_interval: Duration::from_secs(5),
            max_parallel_readers: 5,
            publish_timeout: Duration::from_secs(60),
            metadata_fan_out: 10,
        }
    }
}

/// On-disk configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    /// Populator settings.
    pub queue_populator: QueuePopulatorSection,
    /// Source buckets to ingest.
    #[serde(default)]
    pub sources: Vec<SourceSection>,
}

/// The `queuePopulator` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePopulatorSection {
    /// Coordinator path for ingestion progress.
    pub zookeeper_path: String,
    /// Maximum records per batch.
    #[serde(default)]
    pub batch_max_read: Option<u64>,
    /// Tick rule, `"*/N * * * * *"` for every N seconds.
    #[serde(default)]
    pub cron_rule: Option<String>,
    /// Maximum concurrent batch cycles.
    #[serde(default)]
    pub max_parallel_readers: Option<usize>,
    /// Destination topic.
    #[serde(default)]
    pub topic: Option<String>,
    /// Bus publish timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// One source bucket as configured on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSection {
    /// Display name; becomes the target-bucket prefix.
    pub name: String,
    /// Source bucket.
    pub bucket: String,
    /// Source host.
    pub host: String,
    /// Source port.
    pub port: u16,
    /// Whether to speak TLS.
    #[serde(default)]
    pub https: bool,
    /// Placement hint.
    #[serde(default)]
    pub location_constraint: Option<String>,
    /// Credentials, secret still encrypted.
    pub auth: AuthSection,
}

/// Credential pair; `secret_key` is ciphertext at rest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSection {
    /// Access key id.
    pub access_key: String,
    /// Encrypted secret key.
    pub secret_key: String,
}

impl FileConfig {
    /// Loads a configuration document from disk.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Resolves the document into runtime config and decrypted sources.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Secret`] naming the first source whose secret does
    /// not decrypt; that reader must not start.
    pub fn resolve(
        &self,
        decryptor: &dyn SecretDecryptor,
    ) -> Result<(PipelineConfig, Vec<SourceBucketConfig>), ConfigError> {
        let defaults = PipelineConfig::default();
        let section = &self.queue_populator;
        let config = PipelineConfig {
            coordinator_root: section.zookeeper_path.clone(),
            topic: section.topic.clone().unwrap_or(defaults.topic),
            batch_max_read: section.batch_max_read.unwrap_or(defaults.batch_max_read),
            tick_interval: section
                .cron_rule
                .as_deref()
                .and_then(parse_cron_interval)
                .unwrap_or(defaults.tick_interval),
            max_parallel_readers: section
                .max_parallel_readers
                .unwrap_or(defaults.max_parallel_readers),
            publish_timeout: section
                .timeout_ms
                .map_or(defaults.publish_timeout, Duration::from_millis),
            metadata_fan_out: defaults.metadata_fan_out,
        };

        let mut sources = Vec::with_capacity(self.sources.len());
        for section in &self.sources {
            let secret_key =
                decryptor
                    .decrypt(&section.auth.secret_key)
                    .map_err(|reason| ConfigError::Secret {
                        source_name: section.name.clone(),
                        reason,
                    })?;
            sources.push(SourceBucketConfig {
                name: section.name.clone(),
                bucket: section.bucket.clone(),
                host: section.host.clone(),
                port: section.port,
                https: section.https,
                location_constraint: section.location_constraint.clone(),
                access_key: section.auth.access_key.clone(),
                secret_key,
            });
        }
        Ok((config, sources))
    }
}

/// Seconds interval from a `"*/N * * * * *"` tick rule.
fn parse_cron_interval(rule: &str) -> Option<Duration> {
    let first = rule.split_whitespace().next()?;
    let seconds: u64 = first.strip_prefix("*/")?.parse().ok()?;
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "queuePopulator": {
            "zookeeperPath": "/rivulet/ingestion",
            "batchMaxRead": 500,
            "cronRule": "*/8 * * * * *",
            "topic": "ingest",
            "timeoutMs": 90000
        },
        "sources": [{
            "name": "zenkobucket",
            "bucket": "bucket1",
            "host": "127.0.0.1",
            "port": 9000,
            "https": false,
            "locationConstraint": "us-east-1",
            "auth": {"accessKey": "ak", "secretKey": "c2VjcmV0"}
        }]
    }"#;

    #[test]
    fn test_resolve_document() {
        let file: FileConfig = serde_json::from_str(DOC).unwrap();
        let (config, sources) = file.resolve(&Base64Decryptor).unwrap();
        assert_eq!(config.coordinator_root, "/rivulet/ingestion");
        assert_eq!(config.batch_max_read, 500);
        assert_eq!(config.tick_interval, Duration::from_secs(8));
        assert_eq!(config.topic, "ingest");
        assert_eq!(config.publish_timeout, Duration::from_millis(90_000));
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].secret_key, "secret");
        assert_eq!(sources[0].location_constraint.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let file: FileConfig = serde_json::from_str(
            r#"{"queuePopulator": {"zookeeperPath": "/p"}}"#,
        )
        .unwrap();
        let (config, sources) = file.resolve(&Base64Decryptor).unwrap();
        assert_eq!(config.batch_max_read, 10_000);
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.max_parallel_readers, 5);
        assert!(sources.is_empty());
    }

    #[test]
    fn test_bad_secret_names_the_source() {
        let file: FileConfig = serde_json::from_str(
            r#"{
                "queuePopulator": {"zookeeperPath": "/p"},
                "sources": [{
                    "name": "s1", "bucket": "b", "host": "h", "port": 80,
                    "auth": {"accessKey": "ak", "secretKey": "%%%not-base64%%%"}
                }]
            }"#,
        )
        .unwrap();
        let err = file.resolve(&Base64Decryptor).unwrap_err();
        assert!(matches!(err, ConfigError::Secret { ref source_name, .. } if source_name == "s1"));
    }

    #[test]
    fn test_cron_interval_parsing() {
        assert_eq!(
            parse_cron_interval("*/30 * * * * *"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_cron_interval("0 * * * * *"), None);
        assert_eq!(parse_cron_interval("*/0 * * * * *"), None);
        assert_eq!(parse_cron_interval(""), None);
    }

    #[test]
    fn test_base64_decryptor() {
        assert_eq!(Base64Decryptor.decrypt("c2VjcmV0").unwrap(), "secret");
        assert!(Base64Decryptor.decrypt("!!!").is_err());
    }
}
