//! Directory handling for requests with no origin file
//!
//! Extension-bearing paths are plain 404s. A directory with an
//! `index.html` redirects to it; any other directory gets an HTML listing.

use crate::pipeline::{AssetRequest, AssetResponse, Fallback};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const INDEX: &str = "index.html";

/// Redirects to directory indexes and lists directories without one
#[derive(Debug, Clone)]
pub struct DirectoryFallback {
    source_root: PathBuf,
    preview: bool,
}

impl DirectoryFallback {
    /// `preview` rewrites Markdown links to their rendered preview
    pub fn new(source_root: impl Into<PathBuf>, preview: bool) -> Self {
        Self {
            source_root: source_root.into(),
            preview,
        }
    }

    async fn listing(&self, path: &str, dir: &Path) -> std::io::Result<String> {
        let mut entries = Vec::new();
        let mut reader = fs::read_dir(dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push((name, is_dir));
        }
        entries.sort();

        let base = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };

        let mut items = String::new();
        if base != "/" {
            items.push_str("    <li><a href=\"../\">../</a></li>\n");
        }
        for (name, is_dir) in &entries {
            let mut href = format!("{}{}", base, urlencoding::encode(name));
            let mut label = name.clone();
            if *is_dir {
                href.push('/');
                label.push('/');
            } else if self.preview && name.to_ascii_lowercase().ends_with(".md") {
                href.push_str(".preview.html");
            }
            items.push_str(&format!(
                "    <li><a href=\"{}\">{}</a></li>\n",
                escape(&href),
                escape(&label)
            ));
        }

        Ok(format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n  <meta charset=\"utf-8\">\n  <title>{title}</title>\n</head>\n<body>\n  <h1>{title}</h1>\n  <ul>\n{items}  </ul>\n</body>\n</html>\n",
            title = escape(&base),
            items = items
        ))
    }
}

#[async_trait]
impl Fallback for DirectoryFallback {
    async fn respond(&self, request: &AssetRequest) -> AssetResponse {
        let Some(path) = request.path() else {
            return AssetResponse::not_found();
        };
        if Path::new(&path).extension().is_some() {
            return AssetResponse::not_found();
        }

        let dir = self.source_root.join(path.trim_start_matches('/'));
        if !fs::metadata(&dir).await.is_ok_and(|meta| meta.is_dir()) {
            return AssetResponse::not_found();
        }

        if fs::metadata(dir.join(INDEX)).await.is_ok_and(|meta| meta.is_file()) {
            let location = if path.ends_with('/') {
                format!("{}{}", path, INDEX)
            } else {
                format!("{}/", path)
            };
            return AssetResponse::redirect(location);
        }

        match self.listing(&path, &dir).await {
            Ok(page) => AssetResponse::html(page),
            Err(e) => {
                debug!("Cannot list {}: {}", dir.display(), e);
                AssetResponse::not_found()
            }
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
