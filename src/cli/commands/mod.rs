//! CLI command implementations

pub mod config;
pub mod purge;
pub mod serve;
pub mod warm;

pub use config::execute as config;
pub use purge::execute as purge;
pub use serve::execute as serve;
pub use warm::execute as warm;

use crate::config::Config;
use crate::error::{CdnError, CdnResult};

/// Make the source and destination roots absolute against the working directory
fn absolute_roots(config: &mut Config) -> CdnResult<()> {
    config.cache.source = std::path::absolute(&config.cache.source).map_err(|e| {
        CdnError::io(format!("resolving {}", config.cache.source.display()), e)
    })?;

    let dest = config.cache.dest_dir();
    config.cache.dest = Some(
        std::path::absolute(&dest)
            .map_err(|e| CdnError::io(format!("resolving {}", dest.display()), e))?,
    );
    Ok(())
}
