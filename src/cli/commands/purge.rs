//! Purge command - delete the cache directory

use crate::cli::args::PurgeArgs;
use crate::config::Config;
use crate::error::{CdnError, CdnResult};
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;

/// Execute the purge command
pub async fn execute(args: PurgeArgs, config: &Config) -> CdnResult<()> {
    let ctx = UiContext::detect().with_auto_yes(args.yes);
    let dest = args.dest.clone().unwrap_or_else(|| config.cache.dest_dir());

    check_target(&dest, &config.cache.source)?;

    if !dest.exists() {
        ui::step_warn(&ctx, &format!("Nothing to purge at {}", dest.display()));
        return Ok(());
    }

    let prompt = format!("Delete {} and every built asset in it?", dest.display());
    if !ui::confirm(&ctx, &prompt, false).await? {
        ui::outro_warn(&ctx, "Purge cancelled");
        return Ok(());
    }

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Removing {}...", dest.display()));
    match tokio::fs::remove_dir_all(&dest).await {
        Ok(()) => {
            spinner.stop("Cache purged");
            Ok(())
        }
        Err(e) => {
            spinner.stop_error("Purge failed");
            Err(CdnError::io(format!("removing {}", dest.display()), e))
        }
    }
}

/// Refuse to delete a filesystem root or the origin tree
fn check_target(dest: &Path, source: &Path) -> CdnResult<()> {
    if dest.parent().is_none() {
        return Err(CdnError::User(format!(
            "Refusing to purge {}",
            dest.display()
        )));
    }

    let same = match (dest.canonicalize(), source.canonicalize()) {
        (Ok(dest), Ok(source)) => source.starts_with(dest),
        _ => false,
    };
    if same {
        return Err(CdnError::User(format!(
            "Refusing to purge {}: it contains the source directory",
            dest.display()
        )));
    }
    Ok(())
}
