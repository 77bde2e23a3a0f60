//! Built-in transformer: verbatim copy plus compressed variants
//!
//! Does no minification or resizing. Old sidecars are removed first, then
//! each artifact goes to a temporary sibling and is renamed into place. Its
//! sidecar is written last, the same way.

use crate::cache::{http_date, sidecar_path, with_suffix, AssetMetadata};
use crate::error::{CdnError, CdnResult};
use crate::transform::{is_compressible, Encoding, TransformOptions, Transformer};
use async_trait::async_trait;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// Copies origin files and writes gzip/deflate variants for text assets
#[derive(Debug, Clone, Default)]
pub struct CopyTransformer;

impl CopyTransformer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for CopyTransformer {
    async fn transform(
        &self,
        source: &Path,
        target: &Path,
        options: &TransformOptions,
    ) -> CdnResult<()> {
        let source_meta = fs::metadata(source)
            .await
            .map_err(|e| CdnError::io(format!("stat {}", source.display()), e))?;
        let modified = source_meta
            .modified()
            .map_err(|e| CdnError::io(format!("reading mtime of {}", source.display()), e))?;
        let bytes: Arc<[u8]> = fs::read(source)
            .await
            .map_err(|e| CdnError::io(format!("reading {}", source.display()), e))?
            .into();

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CdnError::io(format!("creating directory {}", parent.display()), e))?;
        }

        retire_sidecars(target).await?;

        let last_modified = http_date(modified);
        let mime = content_type(target);

        write_artifact(target, &bytes, None, &last_modified, mime, options).await?;

        if is_compressible(&target.to_string_lossy()) {
            for encoding in self.encodings() {
                let encoding = *encoding;
                let input = Arc::clone(&bytes);
                let compressed = tokio::task::spawn_blocking(move || compress(encoding, &input))
                    .await
                    .map_err(|e| CdnError::Internal(format!("compression task failed: {}", e)))?
                    .map_err(|e| CdnError::io(format!("{} compressing {}", encoding, source.display()), e))?;

                let variant = with_suffix(target, encoding.suffix());
                write_artifact(&variant, &compressed, Some(encoding), &last_modified, mime, options)
                    .await?;
            }
        }

        debug!("Copied {} -> {}", source.display(), target.display());
        Ok(())
    }

    fn encodings(&self) -> &[Encoding] {
        &[Encoding::Gzip, Encoding::Deflate]
    }

    fn name(&self) -> &'static str {
        "copy"
    }
}

/// Weak validator derived from size and content: `"<hex len>-<16 hex of sha256>"`
pub(crate) fn etag(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("\"{:x}-{}\"", bytes.len(), &hex::encode(digest)[..16])
}

fn compress(encoding: Encoding, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    match encoding {
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(bytes)?;
            encoder.finish()
        }
        Encoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(bytes)?;
            encoder.finish()
        }
        Encoding::Brotli => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "brotli is not produced by the copy transformer",
        )),
    }
}

async fn write_artifact(
    path: &Path,
    bytes: &[u8],
    encoding: Option<Encoding>,
    last_modified: &str,
    mime: &str,
    options: &TransformOptions,
) -> CdnResult<()> {
    let mut headers = vec![
        ("Content-Type".to_string(), mime.to_string()),
        ("Content-Length".to_string(), bytes.len().to_string()),
        ("ETag".to_string(), etag(bytes)),
        ("Last-Modified".to_string(), last_modified.to_string()),
    ];
    if let Some(encoding) = encoding {
        headers.push(("Content-Encoding".to_string(), encoding.token().to_string()));
        headers.push(("Vary".to_string(), "Accept-Encoding".to_string()));
    }
    for (name, value) in &options.headers {
        headers.push((name.clone(), value.clone()));
    }

    let sidecar = serde_json::to_vec(&AssetMetadata::new(headers).to_json())?;

    // Artifact first, sidecar last
    replace_file(path, bytes).await?;
    replace_file(&sidecar_path(path), &sidecar).await
}

/// Remove the previous build's sidecars before any bytes change, so a reader
/// never pairs old headers with new content. Readers see a miss instead.
async fn retire_sidecars(target: &Path) -> CdnResult<()> {
    let variants = Encoding::PREFERENCE
        .iter()
        .map(|encoding| with_suffix(target, encoding.suffix()));

    for artifact in std::iter::once(target.to_path_buf()).chain(variants) {
        let sidecar = sidecar_path(&artifact);
        match fs::remove_file(&sidecar).await {
            Ok(()) => debug!("Retired {}", sidecar.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CdnError::io(format!("removing {}", sidecar.display()), e)),
        }
    }
    Ok(())
}

async fn replace_file(path: &Path, bytes: &[u8]) -> CdnResult<()> {
    let temp = temp_sibling(path);
    fs::write(&temp, bytes)
        .await
        .map_err(|e| CdnError::io(format!("writing {}", temp.display()), e))?;
    fs::rename(&temp, path)
        .await
        .map_err(|e| CdnError::io(format!("renaming {} into place", path.display()), e))
}

fn temp_sibling(path: &Path) -> PathBuf {
    with_suffix(path, &format!(".tmp-{}", std::process::id()))
}

/// MIME type by extension, with charsets for text
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("txt") => "text/plain; charset=UTF-8",
        Some("html" | "htm") => "text/html; charset=UTF-8",
        Some("css") => "text/css; charset=UTF-8",
        Some("csv") => "text/csv; charset=UTF-8",
        Some("md") => "text/markdown; charset=UTF-8",
        Some("js" | "mjs") => "application/javascript; charset=UTF-8",
        Some("json" | "map") => "application/json; charset=UTF-8",
        Some("webmanifest") => "application/manifest+json; charset=UTF-8",
        Some("xml") => "application/xml; charset=UTF-8",
        Some("yaml" | "yml") => "application/yaml; charset=UTF-8",
        Some("svg") => "image/svg+xml; charset=UTF-8",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("ico") => "image/vnd.microsoft.icon",
        Some("wasm") => "application/wasm",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("pdf") => "application/pdf",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}
