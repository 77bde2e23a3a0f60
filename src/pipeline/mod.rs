//! Conditional serving pipeline
//!
//! One request walks this state machine:
//!
//! ```text
//! START ─▶ STAT_ORIGIN ─┬─ not found ───────────────▶ FALLBACK / 404
//!                       ├─ /favicon.ico ────────────▶ STREAM
//!                       └─ LOOKUP_METADATA ─┬─ fresh ─▶ SERVE (304 allowed)
//!                                           └─ stale / missing
//!                                                ─▶ ENSURE_DIR ─▶ BUILD ─▶ SERVE (200 only)
//! ```
//!
//! Every unexpected failure becomes an empty 500.

mod request;
mod response;

pub use request::{decode_path, negotiate, real_path, AssetRequest, RequestContext, VirtualFeatures};
pub use response::{AssetResponse, Body};

use crate::build::{BuildCoordinator, MarkerWatch};
use crate::cache::{with_suffix, AssetMetadata, DirCache, FileStat, MetadataCache, StatCache};
use crate::config::Config;
use crate::error::{CdnError, CdnResult};
use crate::journal::BuildJournal;
use crate::transform::{create_transformer, TransformOptions, Transformer};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tracing::{debug, error};

const FAVICON: &str = "/favicon.ico";
const FAVICON_TYPE: &str = "image/vnd.microsoft.icon";

/// Handles requests whose origin file does not exist
#[async_trait]
pub trait Fallback: Send + Sync {
    async fn respond(&self, request: &AssetRequest) -> AssetResponse;
}

/// Everything the pipeline consumes from configuration
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    /// Cache TTL; zero serves previously built assets without rechecking
    pub ttl: Duration,
    pub marker_timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Forwarded to the transformer; also carries the static headers and
    /// the preview/source-map switches
    pub options: TransformOptions,
}

impl ServerSettings {
    /// Settings with configuration defaults for the given roots
    pub fn new(source_root: impl Into<PathBuf>, dest_root: impl Into<PathBuf>) -> Self {
        let defaults = Config::default();
        Self {
            source_root: source_root.into(),
            dest_root: dest_root.into(),
            ttl: defaults.cache.ttl(),
            marker_timeout: defaults.cache.marker_timeout(),
            poll_interval: defaults.cache.poll_interval(),
            options: TransformOptions::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            source_root: config.cache.source.clone(),
            dest_root: config.cache.dest_dir(),
            ttl: config.cache.ttl(),
            marker_timeout: config.cache.marker_timeout(),
            poll_interval: config.cache.poll_interval(),
            options: TransformOptions::from_config(config),
        }
    }

    fn features(&self) -> VirtualFeatures {
        VirtualFeatures {
            preview: self.options.preview,
            source_map: self.options.source_map,
        }
    }
}

/// Result of checking the cached metadata of a target
enum Lookup {
    Fresh(Arc<AssetMetadata>),
    Stale,
    Missing,
}

/// Outcome before the fallback is consulted
enum Outcome {
    Respond(AssetResponse),
    NotFound,
}

/// One server instance: its caches, its build coordinator, its settings
pub struct AssetServer {
    settings: ServerSettings,
    stat: StatCache,
    metadata: Arc<MetadataCache>,
    dirs: DirCache,
    builds: BuildCoordinator,
}

impl AssetServer {
    pub fn new(
        settings: ServerSettings,
        transformer: Arc<dyn Transformer>,
        journal: BuildJournal,
    ) -> Self {
        let metadata = Arc::new(MetadataCache::new());
        let watch = MarkerWatch::new(settings.poll_interval, settings.marker_timeout);
        let builds = BuildCoordinator::new(Arc::clone(&metadata), transformer, watch, journal);

        Self {
            settings,
            stat: StatCache::new(),
            metadata,
            dirs: DirCache::new(),
            builds,
        }
    }

    pub fn from_config(config: &Config) -> CdnResult<Self> {
        Ok(Self::new(
            ServerSettings::from_config(config),
            create_transformer(config)?,
            BuildJournal::from_config(config),
        ))
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn stat_cache(&self) -> &StatCache {
        &self.stat
    }

    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata
    }

    pub fn builds(&self) -> &BuildCoordinator {
        &self.builds
    }

    /// Answer one request. `fallback` is consulted when the origin is absent.
    pub async fn handle(
        &self,
        request: &AssetRequest,
        fallback: Option<&dyn Fallback>,
    ) -> AssetResponse {
        match self.respond(request).await {
            Ok(Outcome::Respond(response)) => {
                debug!("{} -> {}", request.uri, response.status);
                response
            }
            Ok(Outcome::NotFound) => match fallback {
                Some(fallback) => fallback.respond(request).await,
                None => AssetResponse::not_found(),
            },
            Err(e) => {
                error!("{} -> 500: {}", request.uri, e);
                AssetResponse::internal_error()
            }
        }
    }

    async fn respond(&self, request: &AssetRequest) -> CdnResult<Outcome> {
        let ttl = self.settings.ttl;
        let Some(context) = RequestContext::new(
            request,
            self.settings.features(),
            self.builds.transformer().encodings(),
        ) else {
            return Ok(Outcome::NotFound);
        };

        let origin = under(&self.settings.source_root, &context.real_path);
        let stat = match self.stat.get(&origin, ttl).await {
            Ok(stat) => stat,
            Err(e) => {
                debug!("Origin unavailable for {}: {}", context.path, e);
                return Ok(Outcome::NotFound);
            }
        };

        if context.path == FAVICON {
            return self.favicon(&origin, &stat).await.map(Outcome::Respond);
        }

        let target = with_suffix(
            &under(&self.settings.dest_root, &context.path),
            context.suffix(),
        );

        let (metadata, same_round) = match self.lookup(&target, &stat).await? {
            Lookup::Fresh(metadata) => (metadata, true),
            Lookup::Stale | Lookup::Missing => {
                (self.rebuild(&context, &origin, &target).await?, false)
            }
        };

        self.serve(&target, &metadata, &context, same_round)
            .await
            .map(Outcome::Respond)
    }

    async fn lookup(&self, target: &Path, stat: &FileStat) -> CdnResult<Lookup> {
        let ttl = self.settings.ttl;
        match self.metadata.get(target, ttl).await {
            Ok(metadata) => {
                if ttl.is_zero() || metadata.last_modified() == Some(stat.last_modified.as_str()) {
                    Ok(Lookup::Fresh(metadata))
                } else {
                    debug!("Stale {}", target.display());
                    self.metadata.invalidate(target);
                    Ok(Lookup::Stale)
                }
            }
            Err(e) if e.is_miss() => {
                debug!("Miss {}: {}", target.display(), e);
                Ok(Lookup::Missing)
            }
            Err(e) => Err(e),
        }
    }

    async fn rebuild(
        &self,
        context: &RequestContext,
        origin: &Path,
        target: &Path,
    ) -> CdnResult<Arc<AssetMetadata>> {
        let ttl = self.settings.ttl;
        let build_target = under(&self.settings.dest_root, &context.real_path);

        if let Some(parent) = build_target.parent() {
            self.dirs.ensure(parent, ttl).await?;
        }

        self.builds
            .build(
                &build_target.to_string_lossy(),
                origin,
                &build_target,
                &self.settings.options,
                ttl,
            )
            .await?;

        self.metadata.get(target, ttl).await
    }

    async fn serve(
        &self,
        target: &Path,
        metadata: &AssetMetadata,
        context: &RequestContext,
        same_round: bool,
    ) -> CdnResult<AssetResponse> {
        let headers = metadata.headers().to_vec();

        let etag_matches = context
            .if_none_match
            .as_deref()
            .is_some_and(|tag| Some(tag) == metadata.etag());

        if same_round && etag_matches {
            return Ok(AssetResponse {
                status: 304,
                headers,
                body: Body::Empty,
            });
        }

        let (file, len) = open(target).await?;
        Ok(AssetResponse {
            status: 200,
            headers,
            body: Body::File {
                file,
                len: metadata.content_length().unwrap_or(len),
            },
        })
    }

    async fn favicon(&self, origin: &Path, stat: &FileStat) -> CdnResult<AssetResponse> {
        let (file, _) = open(origin).await?;

        let mut headers = vec![
            ("Content-Length".to_string(), stat.size.to_string()),
            ("Content-Type".to_string(), FAVICON_TYPE.to_string()),
        ];
        for (name, value) in &self.settings.options.headers {
            headers.push((name.clone(), value.clone()));
        }

        Ok(AssetResponse {
            status: 200,
            headers,
            body: Body::File {
                file,
                len: stat.size,
            },
        })
    }
}

/// `root` joined with an absolute request path
fn under(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

async fn open(path: &Path) -> CdnResult<(File, u64)> {
    let file = File::open(path)
        .await
        .map_err(|e| CdnError::io(format!("opening {}", path.display()), e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| CdnError::io(format!("stat {}", path.display()), e))?
        .len();
    Ok((file, len))
}
