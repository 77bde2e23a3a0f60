//! `.wait` marker files
//!
//! A marker exists exactly while some process builds its target. It is
//! created with `O_EXCL` semantics, so at most one process wins.

use crate::cache::with_suffix;
use crate::error::{CdnError, CdnResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Suffix appended to a target path to locate its marker
pub const MARKER_SUFFIX: &str = ".wait";

/// Distinguishes concurrent claims made by one process
static CLAIM_SEQ: AtomicU64 = AtomicU64::new(0);

/// Marker path for a target
pub fn marker_path(target: &Path) -> PathBuf {
    with_suffix(target, MARKER_SUFFIX)
}

/// Ownership of a marker file; removed when dropped
#[derive(Debug)]
pub struct BuildMarker {
    path: PathBuf,
    released: bool,
}

impl BuildMarker {
    /// Try to create the marker exclusively.
    ///
    /// Returns `Ok(None)` when another build already holds it.
    pub async fn acquire(path: &Path) -> CdnResult<Option<Self>> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(CdnError::io(format!("creating marker {}", path.display()), e)),
        };

        let marker = Self {
            path: path.to_path_buf(),
            released: false,
        };

        // Content is diagnostic only; a marker without it is still held
        if let Err(e) = file.write_all(stamp().as_bytes()).await {
            warn!("Failed to write marker {}: {}", path.display(), e);
        }

        debug!("Acquired marker {}", path.display());
        Ok(Some(marker))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker, waking every observer
    pub async fn release(mut self) -> CdnResult<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CdnError::io(
                format!("removing marker {}", self.path.display()),
                e,
            )),
        }
    }
}

impl Drop for BuildMarker {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove marker {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// `"<pid> <unix-millis>\n"`
fn stamp() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{} {}\n", std::process::id(), millis)
}

/// Age of an existing marker, judged by its mtime. `None` if it is gone.
pub async fn marker_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).await.ok()?.modified().ok()?;
    Some(age_of(modified))
}

fn age_of(modified: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO)
}

/// Parse marker content into `(pid, unix-millis)`
pub fn parse_stamp(content: &str) -> Option<(u32, u128)> {
    let mut parts = content.split_whitespace();
    let pid = parts.next()?.parse().ok()?;
    let millis = parts.next()?.parse().ok()?;
    Some((pid, millis))
}

/// A marker taken over from a dead build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimedMarker {
    pub age: Duration,
    pub owner: Option<(u32, u128)>,
}

/// Remove an abandoned marker, but only the one that was judged abandoned.
///
/// The marker is first renamed to a sibling unique to this claim, so of
/// several observers racing on one orphan exactly one takes it. If what was
/// taken turns out to be a younger marker (a fresh build started after the
/// orphan vanished), it is linked back and `None` is returned.
pub async fn reclaim_orphan(
    path: &Path,
    is_orphaned: impl Fn(Duration) -> bool,
) -> CdnResult<Option<ReclaimedMarker>> {
    let Ok(expected) = fs::read_to_string(path).await else {
        return Ok(None);
    };
    match marker_age(path).await {
        Some(age) if is_orphaned(age) => {}
        _ => return Ok(None),
    }

    let claim = with_suffix(
        path,
        &format!(
            ".reclaim-{}-{}",
            std::process::id(),
            CLAIM_SEQ.fetch_add(1, Ordering::Relaxed)
        ),
    );
    match fs::rename(path, &claim).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CdnError::io(
                format!("claiming orphaned marker {}", path.display()),
                e,
            ))
        }
    }

    // rename keeps content and mtime, so both identify what was taken
    let taken = fs::read_to_string(&claim).await.unwrap_or_default();
    let taken_age = fs::metadata(&claim)
        .await
        .ok()
        .and_then(|meta| meta.modified().ok())
        .map(age_of);

    match taken_age {
        Some(age) if taken == expected && is_orphaned(age) => {
            if let Err(e) = fs::remove_file(&claim).await {
                warn!("Failed to remove claimed marker {}: {}", claim.display(), e);
            }
            Ok(Some(ReclaimedMarker {
                age,
                owner: parse_stamp(&taken),
            }))
        }
        _ => {
            debug!("Marker {} changed owner, putting it back", path.display());
            restore(&claim, path).await;
            Ok(None)
        }
    }
}

/// Return a wrongly claimed live marker without clobbering a newer one
async fn restore(claim: &Path, path: &Path) {
    if let Err(e) = fs::hard_link(claim, path).await {
        if e.kind() != ErrorKind::AlreadyExists {
            warn!("Failed to restore marker {}: {}", path.display(), e);
        }
    }
    if let Err(e) = fs::remove_file(claim).await {
        warn!("Failed to remove claimed marker {}: {}", claim.display(), e);
    }
}
