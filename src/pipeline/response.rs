//! Transport-independent responses

use crate::error::{CdnError, CdnResult};
use std::fmt;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Response body
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    /// An open file to stream, `len` bytes long
    File { file: File, len: u64 },
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::File { len, .. } => write!(f, "File({} bytes)", len),
        }
    }
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::File { len, .. } => *len == 0,
        }
    }

    /// Read the whole body into memory
    pub async fn into_bytes(self) -> CdnResult<Vec<u8>> {
        match self {
            Self::Empty => Ok(Vec::new()),
            Self::Bytes(bytes) => Ok(bytes),
            Self::File { mut file, len } => {
                let mut buf = Vec::with_capacity(len as usize);
                file.read_to_end(&mut buf)
                    .await
                    .map_err(|e| CdnError::io("reading response body", e))?;
                Ok(buf)
            }
        }
    }
}

/// Status, headers and body produced by the pipeline
#[derive(Debug)]
pub struct AssetResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl AssetResponse {
    /// Bare status with no headers and an empty body
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn not_found() -> Self {
        Self::status(404)
    }

    pub fn internal_error() -> Self {
        Self::status(500)
    }

    /// 302 to `location`
    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: 302,
            headers: vec![("Location".to_string(), location.into())],
            body: Body::Empty,
        }
    }

    /// 200 with an in-memory HTML page
    pub fn html(page: String) -> Self {
        Self {
            status: 200,
            headers: vec![
                (
                    "Content-Type".to_string(),
                    "text/html; charset=UTF-8".to_string(),
                ),
                ("Content-Length".to_string(), page.len().to_string()),
            ],
            body: Body::Bytes(page.into_bytes()),
        }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
