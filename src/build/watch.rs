//! Waiting for another process to finish a build
//!
//! The observer watches the marker's parent directory with native change
//! notification and also polls, so a missed or unsupported notification
//! only costs one poll interval.

use crate::build::marker::marker_age;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// How a wait on a marker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The marker is gone; the other build finished
    Removed,
    /// The marker outlived the orphan timeout
    Orphaned,
}

/// Observer for marker removal
#[derive(Debug, Clone, Copy)]
pub struct MarkerWatch {
    poll_interval: Duration,
    orphan_after: Option<Duration>,
}

impl MarkerWatch {
    /// `orphan_after = None` waits forever
    pub fn new(poll_interval: Duration, orphan_after: Option<Duration>) -> Self {
        Self {
            poll_interval,
            orphan_after,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn orphan_after(&self) -> Option<Duration> {
        self.orphan_after
    }

    /// Whether a marker of this age counts as abandoned
    pub fn is_orphaned(&self, age: Duration) -> bool {
        self.orphan_after.is_some_and(|limit| age >= limit)
    }

    /// Resolve once `marker` no longer exists or is orphaned
    pub async fn wait_for_removal(&self, marker: &Path) -> WaitOutcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Held for the whole wait; dropping it stops notifications
        let _watcher = watch_parent(marker, tx.clone());

        loop {
            match marker_age(marker).await {
                None => return WaitOutcome::Removed,
                Some(age) if self.is_orphaned(age) => return WaitOutcome::Orphaned,
                Some(_) => {}
            }

            tokio::select! {
                _ = rx.recv() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

fn watch_parent(marker: &Path, tx: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let parent = marker.parent()?;

    let watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if event.is_ok() {
            let _ = tx.send(());
        }
    });

    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            debug!("Change notification unavailable, polling only: {}", e);
            return None;
        }
    };

    if let Err(e) = watcher.watch(parent, RecursiveMode::NonRecursive) {
        debug!("Cannot watch {}, polling only: {}", parent.display(), e);
        return None;
    }

    Some(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_marker_returns_immediately() {
        let dir = TempDir::new().unwrap();
        let watch = MarkerWatch::new(Duration::from_secs(60), None);

        let outcome = watch.wait_for_removal(&dir.path().join("a.wait")).await;
        assert_eq!(outcome, WaitOutcome::Removed);
    }

    #[tokio::test]
    async fn wakes_when_marker_removed() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("a.wait");
        std::fs::write(&marker, "1 1\n").unwrap();

        let remover = marker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::remove_file(remover).unwrap();
        });

        let watch = MarkerWatch::new(Duration::from_millis(20), None);
        let outcome = tokio::time::timeout(Duration::from_secs(10), watch.wait_for_removal(&marker))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Removed);
    }

    #[tokio::test]
    async fn old_marker_is_orphaned() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("a.wait");
        std::fs::write(&marker, "1 1\n").unwrap();

        let watch = MarkerWatch::new(Duration::from_millis(10), Some(Duration::from_millis(30)));
        let outcome = tokio::time::timeout(Duration::from_secs(10), watch.wait_for_removal(&marker))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Orphaned);
        assert!(marker.exists());
    }

    #[test]
    fn orphan_threshold() {
        let watch = MarkerWatch::new(Duration::from_millis(10), Some(Duration::from_secs(5)));
        assert!(!watch.is_orphaned(Duration::from_secs(4)));
        assert!(watch.is_orphaned(Duration::from_secs(5)));
        assert!(!MarkerWatch::new(Duration::from_millis(10), None).is_orphaned(Duration::MAX));
    }
}
