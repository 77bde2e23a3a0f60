//! Sidecar header metadata written next to every built asset
//!
//! For a target `X` the transformer writes `X.json`, a flat object of HTTP
//! headers. Numbers are accepted and rendered as decimal strings.

use crate::cache::promise::PromiseCache;
use crate::cache::with_suffix;
use crate::error::{CdnError, CdnResult};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

/// Suffix appended to a target path to locate its sidecar
pub const SIDECAR_SUFFIX: &str = ".json";

/// Sidecar path for an asset
pub fn sidecar_path(asset: &Path) -> PathBuf {
    with_suffix(asset, SIDECAR_SUFFIX)
}

/// Response headers describing one built asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMetadata {
    headers: Vec<(String, String)>,
}

impl AssetMetadata {
    /// Build metadata from an ordered header list
    pub fn new(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }

    /// Parse sidecar bytes. `ETag` and `Last-Modified` are required.
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        let Value::Object(map) = value else {
            return Err("expected a JSON object".to_string());
        };

        let mut headers = Vec::with_capacity(map.len());
        for (name, value) in map {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                other => return Err(format!("header {} has non-scalar value {}", name, other)),
            };
            headers.push((name, value));
        }

        let metadata = Self { headers };
        for required in ["ETag", "Last-Modified"] {
            if metadata.header(required).is_none() {
                return Err(format!("missing {} header", required));
            }
        }
        Ok(metadata)
    }

    /// Serialize as a sidecar object; `Content-Length` is written as a number
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.headers {
            let json = if name.eq_ignore_ascii_case("content-length") {
                value
                    .parse::<u64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::String(value.clone()))
            } else {
                Value::String(value.clone())
            };
            map.insert(name.clone(), json);
        }
        Value::Object(map)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("ETag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.header("Last-Modified")
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")?.parse().ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Full header set, in sidecar order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Memoized sidecar reads keyed by asset path
pub struct MetadataCache {
    cache: PromiseCache<Arc<AssetMetadata>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            cache: PromiseCache::new("metadata"),
        }
    }

    /// Read the sidecar for `asset`.
    ///
    /// Fails with `NotFound` when the sidecar is missing and
    /// `MalformedMetadata` when it cannot be parsed.
    pub async fn get(&self, asset: &Path, ttl: Duration) -> CdnResult<Arc<AssetMetadata>> {
        let sidecar = sidecar_path(asset);
        self.cache
            .get_or_create(&key(asset), ttl, move || read_sidecar(sidecar))
            .await
    }

    /// Drop the cached entry for `asset`
    pub fn invalidate(&self, asset: &Path) {
        self.cache.invalidate(&key(asset));
    }

    pub fn contains(&self, asset: &Path) -> bool {
        self.cache.contains(&key(asset))
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

fn key(asset: &Path) -> String {
    asset.to_string_lossy().into_owned()
}

async fn read_sidecar(path: PathBuf) -> CdnResult<Arc<AssetMetadata>> {
    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(CdnError::NotFound(path)),
        Err(e) => return Err(CdnError::io(format!("reading {}", path.display()), e)),
    };

    AssetMetadata::from_json(&bytes)
        .map(Arc::new)
        .map_err(|reason| CdnError::MalformedMetadata { path, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SIDECAR: &str = r#"{
        "Content-Type": "text/plain; charset=UTF-8",
        "Content-Length": 1363,
        "ETag": "\"553-Pqern58SsN5hVxit\"",
        "Last-Modified": "Sun, 06 Nov 1994 08:49:37 GMT",
        "X-Powered-By": "microcdn"
    }"#;

    #[test]
    fn parses_numbers_as_strings() {
        let metadata = AssetMetadata::from_json(SIDECAR.as_bytes()).unwrap();
        assert_eq!(metadata.content_length(), Some(1363));
        assert_eq!(metadata.header("content-length"), Some("1363"));
        assert_eq!(metadata.etag(), Some("\"553-Pqern58SsN5hVxit\""));
        assert_eq!(metadata.header("x-powered-by"), Some("microcdn"));
        assert_eq!(metadata.headers().len(), 5);
    }

    #[test]
    fn headers_keep_sidecar_order() {
        let metadata = AssetMetadata::from_json(SIDECAR.as_bytes()).unwrap();
        let names: Vec<&str> = metadata.headers().iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            ["Content-Type", "Content-Length", "ETag", "Last-Modified", "X-Powered-By"]
        );
    }

    #[test]
    fn rejects_non_objects_and_missing_etag() {
        assert!(AssetMetadata::from_json(b"[1, 2]").is_err());
        assert!(AssetMetadata::from_json(b"{\"Last-Modified\": \"x\"}")
            .unwrap_err()
            .contains("ETag"));
        assert!(AssetMetadata::from_json(b"{\"ETag\": {}}").is_err());
    }

    #[test]
    fn to_json_keeps_content_length_numeric() {
        let metadata = AssetMetadata::new(vec![
            ("ETag".to_string(), "\"a\"".to_string()),
            ("Last-Modified".to_string(), "x".to_string()),
            ("Content-Length".to_string(), "12".to_string()),
        ]);
        let json = metadata.to_json();
        assert_eq!(json["Content-Length"], 12);
        assert_eq!(json["ETag"], "\"a\"");
    }

    #[tokio::test]
    async fn reads_and_caches_sidecar() {
        let dir = TempDir::new().unwrap();
        let asset = dir.path().join("text.txt.gzip");
        std::fs::write(sidecar_path(&asset), SIDECAR).unwrap();

        let cache = MetadataCache::new();
        let metadata = cache.get(&asset, Duration::from_secs(60)).await.unwrap();
        assert_eq!(metadata.content_type(), Some("text/plain; charset=UTF-8"));
        assert!(cache.contains(&asset));

        cache.invalidate(&asset);
        assert!(!cache.contains(&asset));
    }

    #[tokio::test]
    async fn missing_sidecar_is_not_found() {
        let dir = TempDir::new().unwrap();
        let asset = dir.path().join("nothing.css");

        let cache = MetadataCache::new();
        let err = cache.get(&asset, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, CdnError::NotFound(_)));
        assert!(!cache.contains(&asset));
    }

    #[tokio::test]
    async fn malformed_sidecar_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let asset = dir.path().join("broken.js");
        std::fs::write(sidecar_path(&asset), b"{\"ETag\": ").unwrap();

        let cache = MetadataCache::new();
        let err = cache.get(&asset, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, CdnError::MalformedMetadata { .. }));
        assert!(err.is_miss());
        assert!(!cache.contains(&asset));
    }
}
