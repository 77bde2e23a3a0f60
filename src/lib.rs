//! microcdn - static asset server with build coalescing
//!
//! Serves an origin tree, building compressed variants on first request
//! and caching them with their header metadata. Concurrent requests for
//! one target run a single transform, within a process and across
//! processes sharing the cache directory.

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fallback;
pub mod http;
pub mod journal;
pub mod pipeline;
pub mod transform;
pub mod ui;

pub use error::{CdnError, CdnResult};
pub use pipeline::{AssetRequest, AssetResponse, AssetServer, ServerSettings};
