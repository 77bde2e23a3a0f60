//! Cached filesystem lookups for origin files

use crate::cache::promise::PromiseCache;
use crate::error::{CdnError, CdnResult};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

/// What the pipeline needs to know about an origin file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Modification time as an HTTP-date
    pub last_modified: String,
    /// Size in bytes
    pub size: u64,
}

/// Format a timestamp as an HTTP-date (RFC 7231 IMF-fixdate)
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Memoized `stat` of regular files
pub struct StatCache {
    cache: PromiseCache<FileStat>,
}

impl StatCache {
    pub fn new() -> Self {
        Self {
            cache: PromiseCache::new("stat"),
        }
    }

    /// Stat `path`, failing with `NotFound` unless it is a regular file
    pub async fn get(&self, path: &Path, ttl: Duration) -> CdnResult<FileStat> {
        let owned = path.to_path_buf();
        self.cache
            .get_or_create(&path.to_string_lossy(), ttl, move || stat_origin(owned))
            .await
    }

    /// Underlying store, for inspection
    pub fn entries(&self) -> &PromiseCache<FileStat> {
        &self.cache
    }
}

impl Default for StatCache {
    fn default() -> Self {
        Self::new()
    }
}

async fn stat_origin(path: PathBuf) -> CdnResult<FileStat> {
    let meta = match fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(CdnError::NotFound(path)),
        Err(e) => return Err(CdnError::io(format!("stat {}", path.display()), e)),
    };

    if !meta.is_file() {
        return Err(CdnError::NotFound(path));
    }

    let modified = meta
        .modified()
        .map_err(|e| CdnError::io(format!("reading mtime of {}", path.display()), e))?;

    Ok(FileStat {
        last_modified: http_date(modified),
        size: meta.len(),
    })
}
