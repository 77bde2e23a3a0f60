//! Build deduplication within and across processes
//!
//! In-process, concurrent builds of one target share a single coalesced
//! future. Across processes, the winner of the `.wait` marker race runs
//! the transformer while every other process waits for the marker to go.

use crate::build::marker::{marker_path, reclaim_orphan, BuildMarker};
use crate::build::watch::{MarkerWatch, WaitOutcome};
use crate::cache::{with_suffix, MetadataCache, PromiseCache};
use crate::error::{CdnError, CdnResult};
use crate::journal::BuildJournal;
use crate::transform::{Encoding, TransformOptions, Transformer};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs at most one transform per target at a time
pub struct BuildCoordinator {
    inflight: PromiseCache<()>,
    context: Arc<BuildContext>,
}

struct BuildContext {
    metadata: Arc<MetadataCache>,
    transformer: Arc<dyn Transformer>,
    watch: MarkerWatch,
    journal: BuildJournal,
}

impl BuildCoordinator {
    pub fn new(
        metadata: Arc<MetadataCache>,
        transformer: Arc<dyn Transformer>,
        watch: MarkerWatch,
        journal: BuildJournal,
    ) -> Self {
        Self {
            inflight: PromiseCache::new("build"),
            context: Arc::new(BuildContext {
                metadata,
                transformer,
                watch,
                journal,
            }),
        }
    }

    /// Build `target` from `source`, or join the build already running.
    ///
    /// Resolves `Ok` both when this process ran the transformer and when
    /// another process did; re-reading the metadata tells the two apart
    /// from a failed foreign build.
    pub async fn build(
        &self,
        key: &str,
        source: &Path,
        target: &Path,
        options: &TransformOptions,
        ttl: Duration,
    ) -> CdnResult<()> {
        let context = Arc::clone(&self.context);
        let source = source.to_path_buf();
        let target = target.to_path_buf();
        let options = options.clone();

        self.inflight
            .coalesce(key, move || async move {
                context.run(source, target, options, ttl).await
            })
            .await
    }

    /// Whether a build for `key` is in flight in this process
    pub fn is_building(&self, key: &str) -> bool {
        self.inflight.contains(key)
    }

    pub fn transformer(&self) -> &Arc<dyn Transformer> {
        &self.context.transformer
    }
}

impl BuildContext {
    async fn run(
        &self,
        source: PathBuf,
        target: PathBuf,
        options: TransformOptions,
        ttl: Duration,
    ) -> CdnResult<()> {
        let marker_path = marker_path(&target);

        loop {
            if let Some(marker) = BuildMarker::acquire(&marker_path).await? {
                return self.transform(marker, &source, &target, &options, ttl).await;
            }

            debug!("Waiting for foreign build of {}", target.display());
            match self.watch.wait_for_removal(&marker_path).await {
                WaitOutcome::Removed => {
                    self.forget(&target);
                    self.journal
                        .log("build.waited", &json!({ "target": target.display().to_string() }))
                        .await;
                    return Ok(());
                }
                WaitOutcome::Orphaned => self.reclaim(&marker_path).await?,
            }
        }
    }

    async fn transform(
        &self,
        marker: BuildMarker,
        source: &Path,
        target: &Path,
        options: &TransformOptions,
        ttl: Duration,
    ) -> CdnResult<()> {
        self.forget(target);
        self.journal
            .log(
                "build.started",
                &json!({
                    "source": source.display().to_string(),
                    "target": target.display().to_string(),
                    "transformer": self.transformer.name(),
                }),
            )
            .await;

        let started = Instant::now();
        let result = self.transformer.transform(source, target, options).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = marker.release().await {
            warn!("{}", e);
        }
        self.forget(target);

        match result {
            Ok(()) => {
                info!("Built {} in {}ms", target.display(), elapsed_ms);
                // Warm the entry for the uncompressed target; a miss here is not an error
                let _ = self.metadata.get(target, ttl).await;
                self.journal
                    .log(
                        "build.finished",
                        &json!({ "target": target.display().to_string(), "elapsed_ms": elapsed_ms }),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                let err = match e {
                    CdnError::BuildFailed { .. } => e,
                    other => CdnError::build_failed(target, other.to_string()),
                };
                warn!("{}", err);
                self.journal
                    .log(
                        "build.failed",
                        &json!({ "target": target.display().to_string(), "error": err.to_string() }),
                    )
                    .await;
                Err(err)
            }
        }
    }

    /// Remove an abandoned marker so the race can be re-entered
    async fn reclaim(&self, marker: &Path) -> CdnResult<()> {
        // Another observer may have reclaimed it and started a fresh build
        let watch = self.watch;
        let Some(reclaimed) = reclaim_orphan(marker, |age| watch.is_orphaned(age)).await? else {
            return Ok(());
        };

        warn!(
            "Reclaimed orphaned marker {} (age {}s)",
            marker.display(),
            reclaimed.age.as_secs()
        );
        self.journal
            .log(
                "marker.reclaimed",
                &json!({
                    "marker": marker.display().to_string(),
                    "age_ms": reclaimed.age.as_millis() as u64,
                    "owner_pid": reclaimed.owner.map(|(pid, _)| pid),
                }),
            )
            .await;
        Ok(())
    }

    /// Drop cached metadata for the target and every compressed variant
    fn forget(&self, target: &Path) {
        self.metadata.invalidate(target);
        for encoding in Encoding::PREFERENCE {
            self.metadata
                .invalidate(&with_suffix(target, encoding.suffix()));
        }
    }
}
