//! Transformer selection from configuration

use crate::config::Config;
use crate::error::CdnResult;
use crate::transform::command::CommandTransformer;
use crate::transform::copy::CopyTransformer;
use crate::transform::Transformer;
use std::sync::Arc;
use tracing::debug;

/// Create the transformer the configuration asks for
///
/// An empty `transform.command` selects the built-in [`CopyTransformer`];
/// anything else runs that program through [`CommandTransformer`].
pub fn create_transformer(config: &Config) -> CdnResult<Arc<dyn Transformer>> {
    let transformer: Arc<dyn Transformer> = if config.transform.command.is_empty() {
        Arc::new(CopyTransformer::new())
    } else {
        Arc::new(CommandTransformer::new(&config.transform.command)?)
    };
    debug!("Using {} transformer", transformer.name());
    Ok(transformer)
}
