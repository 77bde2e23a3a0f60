//! microcdn - static asset server
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use microcdn::cli::{Cli, Commands};
use microcdn::config::{Config, ConfigManager};
use microcdn::error::CdnResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CdnResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    let debug_mode = matches!(cli.command, Commands::Serve(ref args) if args.debug);
    init_tracing(&config, cli.verbose, debug_mode);
    debug!("Loaded configuration from {}", config_manager.path().display());

    microcdn::ui::init_theme();

    match cli.command {
        Commands::Serve(args) => microcdn::cli::commands::serve(args, &config).await,
        Commands::Warm(args) => microcdn::cli::commands::warm(args, &config).await,
        Commands::Purge(args) => microcdn::cli::commands::purge(args, &config).await,
        Commands::Config(args) => {
            microcdn::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ or `--debug` = debug. `RUST_LOG` wins when set.
fn init_tracing(config: &Config, verbose: u8, debug_mode: bool) {
    let level = match (verbose, debug_mode) {
        (_, true) | (2.., _) => "debug",
        (1, _) => "info",
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("microcdn={}", level)));

    if config.log.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .without_time()
            .init();
    }
}
