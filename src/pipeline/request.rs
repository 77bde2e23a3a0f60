//! Request decoding and content negotiation

use crate::transform::{is_compressible, Encoding};

/// Virtual suffixes served from a preview build of the real file
const PREVIEW_SUFFIXES: &[&str] = &[".preview.html", ".preview.jpeg"];
/// Virtual suffix served from a source-map build of the real file
const SOURCE_MAP_SUFFIX: &str = ".map";

/// Transport-independent view of an incoming request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetRequest {
    /// Path plus optional query string, as received
    pub uri: String,
    pub accept_encoding: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl AssetRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn accept_encoding(mut self, value: impl Into<String>) -> Self {
        self.accept_encoding = Some(value.into());
        self
    }

    pub fn if_none_match(mut self, value: impl Into<String>) -> Self {
        self.if_none_match = Some(value.into());
        self
    }

    pub fn if_modified_since(mut self, value: impl Into<String>) -> Self {
        self.if_modified_since = Some(value.into());
        self
    }

    /// Decoded request path, or `None` if it can never name an origin file
    pub fn path(&self) -> Option<String> {
        decode_path(&self.uri)
    }
}

/// Which virtual variants the server exposes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtualFeatures {
    pub preview: bool,
    pub source_map: bool,
}

/// Everything the pipeline derives from one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Decoded path as requested
    pub path: String,
    /// Origin path after undoing any virtual suffix
    pub real_path: String,
    /// Negotiated compressed variant
    pub encoding: Option<Encoding>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl RequestContext {
    /// Derive the context, or `None` when the path is unusable
    pub fn new(
        request: &AssetRequest,
        features: VirtualFeatures,
        supported: &[Encoding],
    ) -> Option<Self> {
        let path = request.path()?;
        let real_path = real_path(&path, features);
        let encoding = negotiate(&path, request.accept_encoding.as_deref(), supported);

        Some(Self {
            path,
            real_path,
            encoding,
            if_none_match: request.if_none_match.clone(),
            if_modified_since: request.if_modified_since.clone(),
        })
    }

    /// Variant suffix appended to the target path
    pub fn suffix(&self) -> &'static str {
        self.encoding.map_or("", |encoding| encoding.suffix())
    }
}

/// Strip query and fragment, percent-decode, and reject anything that could
/// escape the origin root
pub fn decode_path(uri: &str) -> Option<String> {
    let raw = uri.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode(raw).ok()?;

    if !decoded.starts_with('/') || decoded.contains(['\0', '\\']) {
        return None;
    }
    if decoded.split('/').any(|segment| segment == "..") {
        return None;
    }
    Some(decoded.into_owned())
}

/// Origin path for a request path, undoing enabled virtual suffixes
pub fn real_path(path: &str, features: VirtualFeatures) -> String {
    if features.preview {
        for suffix in PREVIEW_SUFFIXES {
            if let Some(real) = strip_virtual(path, suffix) {
                return real.to_string();
            }
        }
    }
    if features.source_map {
        if let Some(real) = strip_virtual(path, SOURCE_MAP_SUFFIX) {
            return real.to_string();
        }
    }
    path.to_string()
}

fn strip_virtual<'a>(path: &'a str, suffix: &str) -> Option<&'a str> {
    path.strip_suffix(suffix)
        .filter(|real| !real.is_empty() && !real.ends_with('/'))
}

/// Pick the compressed variant for `path`.
///
/// Only compressible extensions qualify. Candidates are tried in
/// [`Encoding::PREFERENCE`] order, limited to `supported`; the first one the
/// client accepts wins. A token with `q=0` is refused.
pub fn negotiate(path: &str, accept: Option<&str>, supported: &[Encoding]) -> Option<Encoding> {
    if !is_compressible(path) {
        return None;
    }
    let accepted = accepted_tokens(accept?);

    Encoding::PREFERENCE
        .into_iter()
        .filter(|encoding| supported.contains(encoding))
        .find(|encoding| {
            accepted
                .iter()
                .any(|token| token.eq_ignore_ascii_case(encoding.token()))
        })
}

fn accepted_tokens(header: &str) -> Vec<&str> {
    header
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split(';');
            let token = parts.next()?.trim();
            let refused = parts.any(|param| {
                let param = param.trim();
                param
                    .strip_prefix("q=")
                    .or_else(|| param.strip_prefix("Q="))
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            (!token.is_empty() && !refused).then_some(token)
        })
        .collect()
}
