//! HTTP transport over axum
//!
//! Converts requests into [`AssetRequest`]s, runs the pipeline and streams
//! the resulting body. Only `GET` and `HEAD` are served.

use crate::error::{CdnError, CdnResult};
use crate::pipeline::{AssetRequest, AssetResponse, AssetServer, Body, Fallback};
use axum::extract::{Request, State};
use axum::http::header::{ACCEPT_ENCODING, ALLOW, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::stream::{self, Stream};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Port tried first; when taken, an ephemeral port is used instead
pub const DEFAULT_PORT: u16 = 8080;

const CHUNK_SIZE: usize = 64 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<AssetServer>,
    pub fallback: Option<Arc<dyn Fallback>>,
}

/// Router sending every path through the asset pipeline
pub fn router(state: AppState) -> Router {
    Router::new().fallback(serve_asset).with_state(state)
}

/// Bind `host:port`, falling back to an ephemeral port if the default port is busy
pub async fn bind(host: &str, port: u16) -> CdnResult<TcpListener> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Ok(listener),
        Err(e) if port == DEFAULT_PORT => {
            warn!("Port {} unavailable ({}), using an ephemeral port", port, e);
            TcpListener::bind((host, 0))
                .await
                .map_err(|e| CdnError::io(format!("binding {}:0", host), e))
        }
        Err(e) => Err(CdnError::io(format!("binding {}:{}", host, port), e)),
    }
}

/// Serve until Ctrl-C, letting in-flight requests finish
pub async fn serve(listener: TcpListener, state: AppState) -> CdnResult<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| CdnError::io("reading bound address", e))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CdnError::io(format!("serving on {}", addr), e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// URL a human should visit for a bound address
pub fn visit_url(host: &str, addr: SocketAddr) -> String {
    let host = match host {
        "0.0.0.0" | "::" | "" => "localhost",
        other => other,
    };
    format!("http://{}:{}/", host, addr.port())
}

async fn serve_asset(State(state): State<AppState>, request: Request) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(ALLOW, HeaderValue::from_static("GET, HEAD"))],
        )
            .into_response();
    }

    let uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let asset_request = to_asset_request(uri, request.headers());

    let response = state
        .server
        .handle(&asset_request, state.fallback.as_deref())
        .await;
    into_http(response)
}

fn to_asset_request(uri: String, headers: &HeaderMap) -> AssetRequest {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    AssetRequest {
        uri,
        accept_encoding: header(ACCEPT_ENCODING),
        if_none_match: header(IF_NONE_MATCH),
        if_modified_since: header(IF_MODIFIED_SINCE),
    }
}

fn into_http(response: AssetResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!("Skipping invalid header {}: {}", name, value),
        }
    }

    let body = match response.body {
        Body::Empty => axum::body::Body::empty(),
        Body::Bytes(bytes) => axum::body::Body::from(bytes),
        Body::File { file, .. } => axum::body::Body::from_stream(file_chunks(file)),
    };

    (status, headers, body).into_response()
}

fn file_chunks(file: File) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}
