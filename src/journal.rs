//! Build journal
//!
//! Appends one JSON line per build event to `log.build_journal`.
//! Disabled when no path is configured.

use crate::config::Config;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// File-based build event log
#[derive(Debug, Clone, Default)]
pub struct BuildJournal {
    path: Option<PathBuf>,
}

impl BuildJournal {
    /// Journal that records nothing
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Journal appending to `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            path: config.log.build_journal.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Record an event as a JSON line
    ///
    /// Write failures are logged and otherwise ignored; serving never
    /// depends on the journal.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        let Some(path) = &self.path else {
            return;
        };

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "pid": std::process::id(),
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize journal event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = append(path, &line).await {
            warn!("Failed to write build journal {}: {}", path.display(), e);
        }
    }
}

async fn append(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
