//! Asset transformers
//!
//! A transformer turns an origin file into a target artifact plus its
//! sidecar metadata, and usually one compressed variant per encoding:
//!
//! ```text
//! source/app.js ──▶ dest/app.js          dest/app.js.json
//!                   dest/app.js.gzip     dest/app.js.gzip.json
//!                   dest/app.js.deflate  dest/app.js.deflate.json
//! ```
//!
//! Implementations must write each sidecar only after its artifact is
//! completely on disk; readers rely on that ordering.

mod command;
mod copy;
mod factory;

pub use command::CommandTransformer;
pub use copy::{content_type, CopyTransformer};
pub use factory::create_transformer;

use crate::config::Config;
use crate::error::CdnResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Extensions worth serving compressed
const COMPRESSIBLE: &[&str] = &[
    "css", "csv", "htm", "html", "js", "json", "map", "md", "mjs", "svg", "txt", "wasm",
    "webmanifest", "xml", "yaml", "yml",
];

/// Whether a path's extension is on the compressible allow-list
pub fn is_compressible(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            COMPRESSIBLE
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(ext))
        })
}

/// Content encodings a target can be stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Brotli,
    Gzip,
    Deflate,
}

impl Encoding {
    /// Negotiation order, most preferred first
    pub const PREFERENCE: [Encoding; 3] = [Self::Brotli, Self::Gzip, Self::Deflate];

    /// `Accept-Encoding` / `Content-Encoding` token
    pub fn token(&self) -> &'static str {
        match self {
            Self::Brotli => "br",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// File suffix of the variant on disk
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Brotli => ".br",
            Self::Gzip => ".gzip",
            Self::Deflate => ".deflate",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Options forwarded untouched to the transformer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Static headers to record in every sidecar
    pub headers: BTreeMap<String, String>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub preview: bool,
    pub source_map: bool,
    pub no_minify: bool,
    pub no_import: bool,
}

impl TransformOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            headers: config.headers.clone(),
            max_width: config.transform.max_width,
            max_height: config.transform.max_height,
            preview: config.features.preview,
            source_map: config.features.source_map,
            no_minify: config.transform.no_minify,
            no_import: config.transform.no_import,
        }
    }
}

/// Builds target artifacts and their sidecars
///
/// Implementations:
/// - [`CopyTransformer`]: verbatim copy plus gzip/deflate variants
/// - [`CommandTransformer`]: delegates to an external program
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Build `target` (and its variants) from `source`
    async fn transform(
        &self,
        source: &Path,
        target: &Path,
        options: &TransformOptions,
    ) -> CdnResult<()>;

    /// Compressed variants this transformer produces, in preference order
    fn encodings(&self) -> &[Encoding] {
        &Encoding::PREFERENCE
    }

    /// Human-readable name for logs
    fn name(&self) -> &'static str;
}
