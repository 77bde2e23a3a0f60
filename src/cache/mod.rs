//! In-memory asset caches
//!
//! Every cache is a [`PromiseCache`] of shared futures: concurrent lookups of
//! the same key await one filesystem operation, failures are never cached,
//! and entries expire after the configured TTL.
//!
//! | Cache | Key | Value | Fails with |
//! |-------|-----|-------|------------|
//! | [`StatCache`] | origin path | mtime + size | `NotFound` |
//! | [`MetadataCache`] | asset path | sidecar headers | `NotFound`, `MalformedMetadata` |
//! | [`DirCache`] | directory | `()` | `Io` |
//!
//! Caches are owned by a server instance; separate processes never share them.

pub mod dir;
pub mod metadata;
pub mod promise;
pub mod stat;

pub use dir::DirCache;
pub use metadata::{sidecar_path, AssetMetadata, MetadataCache, SIDECAR_SUFFIX};
pub use promise::{EntryState, PromiseCache, SharedResult};
pub use stat::{http_date, FileStat, StatCache};

use std::path::{Path, PathBuf};

/// Append a raw suffix to a path (`a/b.txt` + `.gzip` → `a/b.txt.gzip`)
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}
