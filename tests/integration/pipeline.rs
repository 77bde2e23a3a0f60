//! End-to-end tests of the serving pipeline against a real filesystem

use async_trait::async_trait;
use microcdn::build::marker_path;
use microcdn::cache::{http_date, sidecar_path, AssetMetadata};
use microcdn::error::{CdnError, CdnResult};
use microcdn::fallback::DirectoryFallback;
use microcdn::journal::BuildJournal;
use microcdn::pipeline::{AssetRequest, AssetServer, ServerSettings};
use microcdn::transform::{CopyTransformer, Encoding, TransformOptions, Transformer};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const FIXTURE_ETAG: &str = "\"553-Pqern58SsN5hVxit\"";

/// Copy transformer that counts invocations and can be slowed down or broken
struct CountingTransformer {
    inner: CopyTransformer,
    calls: Arc<AtomicUsize>,
    delay: Duration,
    fail: bool,
}

impl CountingTransformer {
    fn new(calls: &Arc<AtomicUsize>, delay: Duration) -> Self {
        Self {
            inner: CopyTransformer::new(),
            calls: Arc::clone(calls),
            delay,
            fail: false,
        }
    }

    fn failing(calls: &Arc<AtomicUsize>) -> Self {
        Self {
            fail: true,
            ..Self::new(calls, Duration::ZERO)
        }
    }
}

#[async_trait]
impl Transformer for CountingTransformer {
    async fn transform(
        &self,
        source: &Path,
        target: &Path,
        options: &TransformOptions,
    ) -> CdnResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(CdnError::build_failed(target, "minifier crashed"));
        }
        self.inner.transform(source, target, options).await
    }

    fn encodings(&self) -> &[Encoding] {
        self.inner.encodings()
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Writes the target with a fixed ETag, as a foreign transformer would
struct FixedEtagTransformer {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transformer for FixedEtagTransformer {
    async fn transform(
        &self,
        source: &Path,
        target: &Path,
        _options: &TransformOptions,
    ) -> CdnResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        write_fixture(source, target, FIXTURE_ETAG);
        Ok(())
    }

    fn encodings(&self) -> &[Encoding] {
        &[]
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

struct Site {
    _temp: TempDir,
    source: PathBuf,
    dest: PathBuf,
}

impl Site {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&source).unwrap();
        Self {
            _temp: temp,
            source,
            dest,
        }
    }

    fn write(&self, path: &str, content: &str) -> PathBuf {
        let file = self.source.join(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&file, content).unwrap();
        file
    }

    fn settings(&self, ttl: Duration) -> ServerSettings {
        let mut settings = ServerSettings::new(&self.source, &self.dest);
        settings.ttl = ttl;
        settings.poll_interval = Duration::from_millis(20);
        settings
    }

    fn server(&self, ttl: Duration, transformer: impl Transformer + 'static) -> AssetServer {
        AssetServer::new(
            self.settings(ttl),
            Arc::new(transformer),
            BuildJournal::disabled(),
        )
    }
}

/// Target bytes plus a sidecar whose Last-Modified matches `source`
fn write_fixture(source: &Path, target: &Path, etag: &str) {
    let bytes = std::fs::read(source).unwrap();
    let modified = std::fs::metadata(source).unwrap().modified().unwrap();
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(target, &bytes).unwrap();

    let metadata = AssetMetadata::new(vec![
        (
            "Content-Type".to_string(),
            "text/plain; charset=UTF-8".to_string(),
        ),
        ("Content-Length".to_string(), bytes.len().to_string()),
        ("ETag".to_string(), etag.to_string()),
        ("Last-Modified".to_string(), http_date(modified)),
    ]);
    std::fs::write(
        sidecar_path(target),
        serde_json::to_vec(&metadata.to_json()).unwrap(),
    )
    .unwrap();
}

fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_build_once() {
    let site = Site::new();
    site.write("app.js", &"let x = 1;\n".repeat(100));
    let counter = Arc::new(AtomicUsize::new(0));
    let server = Arc::new(site.server(
        Duration::from_secs(60),
        CountingTransformer::new(&counter, Duration::from_millis(100)),
    ));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let server = Arc::clone(&server);
        handles.push(tokio::spawn(async move {
            let request = AssetRequest::new("/app.js").accept_encoding("gzip");
            let response = server.handle(&request, None).await;
            (response.status, response.header("ETag").map(str::to_string))
        }));
    }

    let mut etags = Vec::new();
    for handle in handles {
        let (status, etag) = handle.await.unwrap();
        assert_eq!(status, 200);
        etags.push(etag.unwrap());
    }

    assert_eq!(calls(&counter), 1);
    assert!(etags.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(!marker_path(&site.dest.join("app.js")).exists());
}

#[tokio::test]
async fn conditional_get_on_fresh_hit() {
    let site = Site::new();
    let origin = site.write("text.txt", "conditional body");
    write_fixture(&origin, &site.dest.join("text.txt"), FIXTURE_ETAG);

    let counter = Arc::new(AtomicUsize::new(0));
    let server = site.server(
        Duration::from_secs(60),
        CountingTransformer::new(&counter, Duration::ZERO),
    );

    let not_modified = server
        .handle(&AssetRequest::new("/text.txt").if_none_match(FIXTURE_ETAG), None)
        .await;
    assert_eq!(not_modified.status, 304);
    assert_eq!(not_modified.header("ETag"), Some(FIXTURE_ETAG));
    assert_eq!(not_modified.header("Content-Type"), Some("text/plain; charset=UTF-8"));
    assert_eq!(not_modified.header("Content-Length"), Some("16"));
    let not_modified_headers = not_modified.headers.clone();
    assert!(not_modified.body.into_bytes().await.unwrap().is_empty());

    let mismatched = server
        .handle(&AssetRequest::new("/text.txt").if_none_match("\"other\""), None)
        .await;
    assert_eq!(mismatched.status, 200);
    assert_eq!(mismatched.headers, not_modified_headers);
    assert_eq!(mismatched.body.into_bytes().await.unwrap(), b"conditional body");

    let plain = server.handle(&AssetRequest::new("/text.txt"), None).await;
    assert_eq!(plain.status, 200);
    assert_eq!(plain.headers, not_modified_headers);

    assert_eq!(calls(&counter), 0);
}

#[tokio::test]
async fn no_304_on_the_round_that_rebuilt() {
    let site = Site::new();
    site.write("text.txt", "rebuilt body");
    let counter = Arc::new(AtomicUsize::new(0));
    let server = site.server(
        Duration::from_secs(60),
        FixedEtagTransformer {
            calls: Arc::clone(&counter),
        },
    );
    let request = AssetRequest::new("/text.txt").if_none_match(FIXTURE_ETAG);

    let first = server.handle(&request, None).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("ETag"), Some(FIXTURE_ETAG));

    let second = server.handle(&request, None).await;
    assert_eq!(second.status, 304);
    assert_eq!(calls(&counter), 1);
}

#[tokio::test]
async fn negotiates_compressed_variant() {
    let site = Site::new();
    site.write("text.txt", &"compress me please ".repeat(50));
    site.write("icon.ico", "not really an icon");
    let server = site.server(Duration::from_secs(60), CopyTransformer::new());

    let text = server
        .handle(&AssetRequest::new("/text.txt").accept_encoding("gzip"), None)
        .await;
    assert_eq!(text.status, 200);
    assert_eq!(text.header("Content-Encoding"), Some("gzip"));
    let gzip = std::fs::read(site.dest.join("text.txt.gzip")).unwrap();
    assert_eq!(text.body.into_bytes().await.unwrap(), gzip);

    let deflate = server
        .handle(&AssetRequest::new("/text.txt").accept_encoding("deflate"), None)
        .await;
    assert_eq!(deflate.header("Content-Encoding"), Some("deflate"));

    let icon = server
        .handle(&AssetRequest::new("/icon.ico").accept_encoding("gzip, br"), None)
        .await;
    assert_eq!(icon.status, 200);
    assert_eq!(icon.header("Content-Encoding"), None);
    assert_eq!(icon.header("Content-Type"), Some("image/vnd.microsoft.icon"));
    assert!(!site.dest.join("icon.ico.gzip").exists());
}

#[tokio::test]
async fn favicon_bypasses_build() {
    let site = Site::new();
    site.write("favicon.ico", "0123456789");
    let counter = Arc::new(AtomicUsize::new(0));
    let mut settings = site.settings(Duration::from_secs(60));
    settings
        .options
        .headers
        .insert("X-Powered-By".to_string(), "microcdn".to_string());
    let server = AssetServer::new(
        settings,
        Arc::new(CountingTransformer::new(&counter, Duration::ZERO)),
        BuildJournal::disabled(),
    );

    let response = server
        .handle(&AssetRequest::new("/favicon.ico").accept_encoding("gzip"), None)
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("image/vnd.microsoft.icon"));
    assert_eq!(response.header("Content-Length"), Some("10"));
    assert_eq!(response.header("X-Powered-By"), Some("microcdn"));
    assert_eq!(response.body.into_bytes().await.unwrap(), b"0123456789");

    assert_eq!(calls(&counter), 0);
    assert!(!marker_path(&site.dest.join("favicon.ico")).exists());
    assert!(!site.dest.join("favicon.ico").exists());
}

#[tokio::test]
async fn origin_change_rebuilds_after_stat_expiry() {
    let site = Site::new();
    let origin = site.write("style.css", "a { color: red }");
    let counter = Arc::new(AtomicUsize::new(0));
    let server = site.server(
        Duration::from_millis(50),
        CountingTransformer::new(&counter, Duration::ZERO),
    );

    let first = server.handle(&AssetRequest::new("/style.css"), None).await;
    assert_eq!(first.status, 200);
    let first_modified = first.header("Last-Modified").unwrap().to_string();

    let cached = server.handle(&AssetRequest::new("/style.css"), None).await;
    assert_eq!(cached.status, 200);
    assert_eq!(calls(&counter), 1);

    std::fs::write(&origin, "a { color: blue }").unwrap();
    let later = SystemTime::now() + Duration::from_secs(10);
    std::fs::File::options()
        .write(true)
        .open(&origin)
        .unwrap()
        .set_modified(later)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let rebuilt = server.handle(&AssetRequest::new("/style.css"), None).await;
    assert_eq!(rebuilt.status, 200);
    assert_eq!(calls(&counter), 2);
    assert_ne!(rebuilt.header("Last-Modified").unwrap(), first_modified);
    assert_eq!(rebuilt.header("Last-Modified").unwrap(), http_date(later));
    assert_eq!(
        rebuilt.body.into_bytes().await.unwrap(),
        b"a { color: blue }"
    );
}

#[tokio::test]
async fn stat_entries_expire_after_ttl() {
    let site = Site::new();
    let origin = site.write("app.js", "1");
    let server = site.server(Duration::from_millis(50), CopyTransformer::new());

    let response = server.handle(&AssetRequest::new("/app.js"), None).await;
    assert_eq!(response.status, 200);
    let key = origin.to_string_lossy();
    assert!(server.stat_cache().entries().contains(&key));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!server.stat_cache().entries().contains(&key));

    let again = server.handle(&AssetRequest::new("/app.js"), None).await;
    assert_eq!(again.status, 200);
}

#[tokio::test]
async fn zero_ttl_serves_previous_build() {
    let site = Site::new();
    let origin = site.write("app.js", "old");
    let counter = Arc::new(AtomicUsize::new(0));
    let server = site.server(
        Duration::ZERO,
        CountingTransformer::new(&counter, Duration::ZERO),
    );

    server.handle(&AssetRequest::new("/app.js"), None).await;
    std::fs::write(&origin, "new").unwrap();

    let response = server.handle(&AssetRequest::new("/app.js"), None).await;
    assert_eq!(response.body.into_bytes().await.unwrap(), b"old");
    assert_eq!(calls(&counter), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_servers_share_one_build() {
    let site = Site::new();
    site.write("shared.css", &"body { margin: 0 }\n".repeat(40));
    let counter = Arc::new(AtomicUsize::new(0));

    // Separate caches and coordinators; only the filesystem is shared
    let first = Arc::new(site.server(
        Duration::from_secs(60),
        CountingTransformer::new(&counter, Duration::from_millis(300)),
    ));
    let second = Arc::new(site.server(
        Duration::from_secs(60),
        CountingTransformer::new(&counter, Duration::from_millis(300)),
    ));

    let request = AssetRequest::new("/shared.css").accept_encoding("gzip");
    let (a, b) = tokio::join!(
        {
            let first = Arc::clone(&first);
            let request = request.clone();
            async move { first.handle(&request, None).await }
        },
        {
            let second = Arc::clone(&second);
            let request = request.clone();
            async move { second.handle(&request, None).await }
        }
    );

    assert_eq!(a.status, 200);
    assert_eq!(b.status, 200);
    assert_eq!(a.header("ETag"), b.header("ETag"));
    assert_eq!(calls(&counter), 1);
    assert!(!marker_path(&site.dest.join("shared.css")).exists());
}

#[tokio::test]
async fn failed_build_is_500_and_retried() {
    let site = Site::new();
    site.write("broken.js", "function (");
    let counter = Arc::new(AtomicUsize::new(0));
    let server = site.server(
        Duration::from_secs(60),
        CountingTransformer::failing(&counter),
    );

    let first = server.handle(&AssetRequest::new("/broken.js"), None).await;
    assert_eq!(first.status, 500);
    assert!(first.body.into_bytes().await.unwrap().is_empty());
    assert!(!marker_path(&site.dest.join("broken.js")).exists());
    assert!(!server
        .metadata_cache()
        .contains(&site.dest.join("broken.js")));

    let second = server.handle(&AssetRequest::new("/broken.js"), None).await;
    assert_eq!(second.status, 500);
    assert_eq!(calls(&counter), 2);
}

#[tokio::test]
async fn malformed_sidecar_triggers_rebuild() {
    let site = Site::new();
    site.write("data.json", "{\"a\": 1}");
    std::fs::create_dir_all(&site.dest).unwrap();
    std::fs::write(site.dest.join("data.json"), "stale").unwrap();
    std::fs::write(sidecar_path(&site.dest.join("data.json")), "{ not json").unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let server = site.server(
        Duration::from_secs(60),
        CountingTransformer::new(&counter, Duration::ZERO),
    );

    let response = server.handle(&AssetRequest::new("/data.json"), None).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body.into_bytes().await.unwrap(), b"{\"a\": 1}");
    assert_eq!(calls(&counter), 1);
}

#[tokio::test]
async fn missing_origin_uses_fallback() {
    let site = Site::new();
    site.write("docs/guide.md", "# Guide");
    let server = site.server(Duration::from_secs(60), CopyTransformer::new());

    let plain = server.handle(&AssetRequest::new("/nope.css"), None).await;
    assert_eq!(plain.status, 404);

    let escape = server.handle(&AssetRequest::new("/../secret.txt"), None).await;
    assert_eq!(escape.status, 404);

    let fallback = DirectoryFallback::new(&site.source, true);
    let listing = server
        .handle(&AssetRequest::new("/docs/"), Some(&fallback))
        .await;
    assert_eq!(listing.status, 200);
    let html = String::from_utf8(listing.body.into_bytes().await.unwrap()).unwrap();
    assert!(html.contains("/docs/guide.md.preview.html"));

    let missing = server
        .handle(&AssetRequest::new("/docs/missing.css"), Some(&fallback))
        .await;
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn source_map_requests_build_the_real_file() {
    let site = Site::new();
    site.write("app.js", "let a = 1;");
    let mut settings = site.settings(Duration::from_secs(60));
    settings.options.source_map = true;
    let counter = Arc::new(AtomicUsize::new(0));
    let server = AssetServer::new(
        settings,
        Arc::new(CountingTransformer::new(&counter, Duration::ZERO)),
        BuildJournal::disabled(),
    );

    // The copy transformer writes no maps, so the rebuilt round has nothing to serve
    let response = server.handle(&AssetRequest::new("/app.js.map"), None).await;
    assert_eq!(response.status, 500);
    assert_eq!(calls(&counter), 1);
    assert!(site.dest.join("app.js").exists());
}
