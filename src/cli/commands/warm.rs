//! Warm command - build assets through the pipeline before serving

use super::absolute_roots;
use crate::cli::args::WarmArgs;
use crate::config::Config;
use crate::error::{CdnError, CdnResult};
use crate::pipeline::{AssetRequest, AssetServer};
use crate::ui::{self, UiContext, WarmProgress};

/// Execute the warm command
pub async fn execute(args: WarmArgs, config: &Config) -> CdnResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();
    args.cdn.apply(&mut config);
    absolute_roots(&mut config)?;

    let server = AssetServer::from_config(&config)?;
    let progress = WarmProgress::new(&ctx, args.paths.len() as u64);

    let mut failed = Vec::new();
    for path in &args.paths {
        let status = warm_one(&server, path, &args.encoding).await;
        progress.record(path, status);
        if status >= 400 {
            failed.push((path.clone(), status));
        }
    }
    progress.finish();

    if failed.is_empty() {
        ui::outro_success(&ctx, &format!("Warmed {} asset(s)", args.paths.len()));
        return Ok(());
    }

    for (path, status) in &failed {
        ui::step_error_detail(&ctx, &format!("HTTP {}", status), path);
    }
    Err(CdnError::User(format!(
        "{} of {} asset(s) could not be built",
        failed.len(),
        args.paths.len()
    )))
}

/// Request one path, accepting every encoding so all variants get built
async fn warm_one(server: &AssetServer, path: &str, encoding: &str) -> u16 {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let request = AssetRequest::new(path).accept_encoding(encoding);
    server.handle(&request, None).await.status
}
