//! CLI argument definitions using clap derive

use crate::config::Config;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Cache timeout applied by `--debug`, in milliseconds
pub const DEBUG_TTL_MS: u64 = 500;

/// microcdn - a static asset server that builds and caches compressed variants
#[derive(Parser, Debug)]
#[command(name = "microcdn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MICROCDN_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve a directory over HTTP
    Serve(ServeArgs),

    /// Build assets ahead of the first request
    Warm(WarmArgs),

    /// Delete the cache directory
    Purge(PurgeArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Options shared by every command that runs the asset pipeline
#[derive(Args, Debug, Default, Clone)]
pub struct CdnArgs {
    /// Origin directory to serve
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Directory for built assets and sidecars
    #[arg(short, long, visible_alias = "cache")]
    pub dest: Option<PathBuf>,

    /// Cache timeout in milliseconds (0 never rechecks origin files)
    #[arg(short = 't', long)]
    pub cache_timeout: Option<u64>,

    /// Serve `.preview.html` / `.preview.jpeg` variants
    #[arg(long)]
    pub preview: bool,

    /// Serve `.map` source maps
    #[arg(long)]
    pub source_map: bool,

    /// Maximum image width
    #[arg(long)]
    pub max_width: Option<u32>,

    /// Maximum image height
    #[arg(long)]
    pub max_height: Option<u32>,

    /// Skip minification
    #[arg(long)]
    pub no_minify: bool,

    /// Skip inlining of CSS/JS imports
    #[arg(long)]
    pub no_import: bool,
}

impl CdnArgs {
    /// Layer the flags that were given over `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref source) = self.source {
            config.cache.source = source.clone();
        }
        if let Some(ref dest) = self.dest {
            config.cache.dest = Some(dest.clone());
        }
        if let Some(ttl) = self.cache_timeout {
            config.cache.ttl_ms = ttl;
        }
        if let Some(width) = self.max_width {
            config.transform.max_width = Some(width);
        }
        if let Some(height) = self.max_height {
            config.transform.max_height = Some(height);
        }
        config.features.preview |= self.preview;
        config.features.source_map |= self.source_map;
        config.transform.no_minify |= self.no_minify;
        config.transform.no_import |= self.no_import;
    }
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub cdn: CdnArgs,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (8080 falls back to a free port when taken)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Short cache timeout, no minification, verbose logs, fresh cache directory
    #[arg(long)]
    pub debug: bool,
}

impl ServeArgs {
    pub fn apply(&self, config: &mut Config) {
        self.cdn.apply(config);
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.debug {
            config.cache.ttl_ms = DEBUG_TTL_MS;
            config.transform.no_minify = true;
        }
    }
}

#[derive(Parser, Debug)]
pub struct WarmArgs {
    #[command(flatten)]
    pub cdn: CdnArgs,

    /// Request paths to build, e.g. /css/app.css
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Accept-Encoding sent with each request
    #[arg(long, default_value = "br, gzip, deflate")]
    pub encoding: String,
}

#[derive(Parser, Debug)]
pub struct PurgeArgs {
    /// Cache directory to delete (defaults to the configured one)
    #[arg(short, long, visible_alias = "cache")]
    pub dest: Option<PathBuf>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g. cache.ttl_ms, headers.X-Powered-By)
        key: String,
        /// Value to set
        value: String,
    },
}
