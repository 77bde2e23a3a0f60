//! Idempotent destination directory creation

use crate::cache::promise::PromiseCache;
use crate::error::{CdnError, CdnResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Remembers which directories were recently created
pub struct DirCache {
    cache: PromiseCache<()>,
}

impl DirCache {
    pub fn new() -> Self {
        Self {
            cache: PromiseCache::new("dir"),
        }
    }

    /// Create `dir` and its ancestors unless done within the last `ttl`
    pub async fn ensure(&self, dir: &Path, ttl: Duration) -> CdnResult<()> {
        let owned = dir.to_path_buf();
        self.cache
            .get_or_create(&dir.to_string_lossy(), ttl, move || create(owned))
            .await
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.cache.contains(&dir.to_string_lossy())
    }
}

impl Default for DirCache {
    fn default() -> Self {
        Self::new()
    }
}

async fn create(dir: PathBuf) -> CdnResult<()> {
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| CdnError::io(format!("creating directory {}", dir.display()), e))
}
