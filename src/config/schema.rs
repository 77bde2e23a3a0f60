//! Configuration schema for microcdn
//!
//! Configuration is stored at `~/.config/microcdn/config.toml`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub server: ServerConfig,

    /// Origin, destination and cache timing
    pub cache: CacheConfig,

    /// Virtual-variant features
    pub features: FeaturesConfig,

    /// Options handed to the transformer
    pub transform: TransformConfig,

    /// Static headers added to every served asset
    pub headers: BTreeMap<String, String>,

    /// Logging settings
    pub log: LogConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Port to bind (8080 falls back to an ephemeral port when taken)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Origin tree to serve
    pub source: PathBuf,

    /// Where built assets and their sidecars are written (default: $TMPDIR/microcdn)
    pub dest: Option<PathBuf>,

    /// In-memory entry lifetime in milliseconds (0 = never recheck)
    pub ttl_ms: u64,

    /// Age after which a build marker is considered orphaned (0 = never)
    pub marker_timeout_secs: u64,

    /// Upper bound between marker existence checks while waiting on another process
    pub poll_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            dest: None,
            ttl_ms: 300_000,
            marker_timeout_secs: 600,
            poll_interval_ms: 250,
        }
    }
}

impl CacheConfig {
    /// Destination root, falling back to the system temp directory
    pub fn dest_dir(&self) -> PathBuf {
        self.dest
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("microcdn"))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn marker_timeout(&self) -> Option<Duration> {
        (self.marker_timeout_secs > 0).then(|| Duration::from_secs(self.marker_timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Optional virtual variants
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Serve `*.preview.html` / `*.preview.jpeg` variants
    pub preview: bool,

    /// Serve `*.map` source maps
    pub source_map: bool,
}

/// Transformer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Max image width in pixels
    pub max_width: Option<u32>,

    /// Max image height in pixels
    pub max_height: Option<u32>,

    /// Do not minify sources
    pub no_minify: bool,

    /// Do not resolve imports
    pub no_import: bool,

    /// External transformer command; `{source}` and `{target}` are substituted.
    /// When empty the built-in copy transformer is used.
    pub command: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log format: "text" or "json"
    pub format: String,

    /// JSON-lines build journal (disabled when unset)
    pub build_journal: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            build_journal: None,
        }
    }
}
