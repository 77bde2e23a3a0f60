//! Error types for microcdn
//!
//! All modules use `CdnResult<T>` as their return type. Errors are `Clone`
//! because cached futures hand the same result to every awaiter.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for microcdn operations
pub type CdnResult<T> = Result<T, CdnError>;

/// All errors that can occur in microcdn
#[derive(Error, Debug, Clone)]
pub enum CdnError {
    // Asset errors
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Malformed metadata at {}: {reason}", .path.display())]
    MalformedMetadata { path: PathBuf, reason: String },

    #[error("Build failed for {}: {reason}", .path.display())]
    BuildFailed { path: PathBuf, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {}: {reason}", .path.display())]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {}: {source}", .path.display())]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl CdnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source: Arc::new(source),
        }
    }

    /// Create a build failure for a target
    pub fn build_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::BuildFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means "no usable artifact", i.e. a rebuild should be attempted
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MalformedMetadata { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Fix the file or run: microcdn config init --force"),
            Self::ConfigDirCreate { .. } => Some("Check permissions of your config directory"),
            Self::CommandFailed { .. } => Some("Check transform.command in your configuration"),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CdnError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<toml::ser::Error> for CdnError {
    fn from(err: toml::ser::Error) -> Self {
        Self::TomlSerialize(err.to_string())
    }
}
