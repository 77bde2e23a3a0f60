//! Serve command - run the HTTP server

use super::absolute_roots;
use crate::cli::args::ServeArgs;
use crate::config::Config;
use crate::error::{CdnError, CdnResult};
use crate::fallback::DirectoryFallback;
use crate::http::{self, AppState};
use crate::pipeline::AssetServer;
use crate::ui::{self, UiContext};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> CdnResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();
    args.apply(&mut config);
    absolute_roots(&mut config)?;

    let dest = config.cache.dest_dir();
    if args.debug {
        wipe(&dest).await?;
    }

    let server = AssetServer::from_config(&config)?;
    let fallback = DirectoryFallback::new(&config.cache.source, config.features.preview);
    let state = AppState {
        server: Arc::new(server),
        fallback: Some(Arc::new(fallback)),
    };

    let listener = http::bind(&config.server.host, config.server.port).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| CdnError::io("reading bound address", e))?;

    ui::intro(&ctx, "microcdn");
    ui::key_value(&ctx, "Source", &config.cache.source.display().to_string());
    ui::key_value(&ctx, "Cache", &dest.display().to_string());
    ui::key_value(&ctx, "Visit", &http::visit_url(&config.server.host, addr));
    println!();

    info!(
        "Serving {} (ttl {}ms, cache {})",
        config.cache.source.display(),
        config.cache.ttl_ms,
        dest.display()
    );
    http::serve(listener, state).await
}

/// Remove a previous cache so debug runs always rebuild
async fn wipe(dest: &Path) -> CdnResult<()> {
    match tokio::fs::remove_dir_all(dest).await {
        Ok(()) => {
            info!("Removed cache {}", dest.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CdnError::io(format!("removing {}", dest.display()), e)),
    }
}
