//! Per-bucket source configuration.

use serde::{Deserialize, Serialize};

/// Connection settings for one source bucket.
///
/// `name` doubles as the target-bucket prefix on the bus: events for
/// `bucket` land under `<name>-<bucket>`. Credentials arrive here
/// already decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBucketConfig {
    /// Display name; becomes the target-bucket prefix.
    pub name: String,
    /// Source bucket to ingest.
    pub bucket: String,
    /// Source cluster host.
    pub host: String,
    /// Source cluster port.
    pub port: u16,
    /// Whether to speak TLS.
    pub https: bool,
    /// Placement hint carried through to downstream processors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_constraint: Option<String>,
    /// Access key id.
    pub access_key: String,
    /// Secret key (plaintext at this boundary).
    pub secret_key: String,
}

impl SourceBucketConfig {
    /// Base URL of the source endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Target bucket name events for this source carry.
    #[must_use]
    pub fn target_bucket(&self) -> String {
        rivulet_core::event::target_bucket(&self.name, &self.bucket)
    }

    /// Canonical string of the editable fields.
    ///
    /// Two configs with equal canonical forms need no client rebuild on
    /// refresh; anything else (credentials, endpoint, TLS) does.
    #[must_use]
    pub fn canonical_form(&self) -> String {
        format!(
            "accessKey:{};secretKey:{};host:{};port:{};useTLS:{}",
            self.access_key, self.secret_key, self.host, self.port, self.https
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SourceBucketConfig {
        SourceBucketConfig {
            name: "zenkobucket".into(),
            bucket: "bucket1".into(),
            host: "127.0.0.1".into(),
            port: 9000,
            https: false,
            location_constraint: None,
            access_key: "ak".into(),
            secret_key: "sk".into(),
        }
    }

    #[test]
    fn test_endpoint_scheme_follows_tls() {
        let mut cfg = config();
        assert_eq!(cfg.endpoint(), "http://127.0.0.1:9000");
        cfg.https = true;
        assert_eq!(cfg.endpoint(), "https://127.0.0.1:9000");
    }

    #[test]
    fn test_target_bucket() {
        assert_eq!(config().target_bucket(), "zenkobucket-bucket1");
    }

    #[test]
    fn test_canonical_form_tracks_editable_fields() {
        let a = config();
        let mut b = config();
        assert_eq!(a.canonical_form(), b.canonical_form());
        b.secret_key = "rotated".into();
        assert_ne!(a.canonical_form(), b.canonical_form());
        // The display name is not editable; it does not affect the form.
        let mut c = config();
        c.name = "other".into();
        assert_eq!(a.canonical_form(), c.canonical_form());
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let json = serde_json::to_string(&config()).unwrap();
        assert!(json.contains("\"accessKey\""));
        assert!(json.contains("\"secretKey\""));
    }
}
