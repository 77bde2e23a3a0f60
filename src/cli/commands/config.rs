//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{CdnError, CdnResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

const VALID_KEYS: &[&str] = &[
    "server.host",
    "server.port",
    "cache.source",
    "cache.dest",
    "cache.ttl_ms",
    "cache.marker_timeout_secs",
    "cache.poll_interval_ms",
    "features.preview",
    "features.source_map",
    "transform.max_width",
    "transform.max_height",
    "transform.no_minify",
    "transform.no_import",
    "transform.command",
    "log.format",
    "log.build_journal",
    "headers.<Name>",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> CdnResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> CdnResult<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> CdnResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> CdnResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();

    if let Err(e) = apply_key(&mut config, key, value) {
        ui::step_error_detail(&ctx, "Cannot set config key", &e.to_string());
        ui::remark(&ctx, &format!("Valid keys: {}", VALID_KEYS.join(", ")));
        return Err(e);
    }

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));
    Ok(())
}

/// Set one dot-separated key on `config`
pub fn apply_key(config: &mut Config, key: &str, value: &str) -> CdnResult<()> {
    let parts: Vec<&str> = key.splitn(2, '.').collect();

    match parts.as_slice() {
        ["server", "host"] => config.server.host = value.to_string(),
        ["server", "port"] => config.server.port = parse_number(value)?,

        ["cache", "source"] => config.cache.source = PathBuf::from(value),
        ["cache", "dest"] => config.cache.dest = optional(value).map(PathBuf::from),
        ["cache", "ttl_ms"] => config.cache.ttl_ms = parse_number(value)?,
        ["cache", "marker_timeout_secs"] => config.cache.marker_timeout_secs = parse_number(value)?,
        ["cache", "poll_interval_ms"] => config.cache.poll_interval_ms = parse_number(value)?,

        ["features", "preview"] => config.features.preview = parse_bool(value)?,
        ["features", "source_map"] => config.features.source_map = parse_bool(value)?,

        ["transform", "max_width"] => {
            config.transform.max_width = optional(value).map(parse_number).transpose()?
        }
        ["transform", "max_height"] => {
            config.transform.max_height = optional(value).map(parse_number).transpose()?
        }
        ["transform", "no_minify"] => config.transform.no_minify = parse_bool(value)?,
        ["transform", "no_import"] => config.transform.no_import = parse_bool(value)?,
        ["transform", "command"] => {
            config.transform.command = value.split_whitespace().map(str::to_string).collect()
        }

        ["log", "format"] => match value {
            "text" | "json" => config.log.format = value.to_string(),
            _ => {
                return Err(CdnError::User(format!(
                    "Invalid log format: {}. Use text/json",
                    value
                )))
            }
        },
        ["log", "build_journal"] => config.log.build_journal = optional(value).map(PathBuf::from),

        ["headers", name] if !name.is_empty() => match optional(value) {
            Some(value) => {
                config.headers.insert(name.to_string(), value.to_string());
            }
            None => {
                config.headers.remove(*name);
            }
        },

        _ => return Err(CdnError::User(format!("Unknown config key: {}", key))),
    }

    Ok(())
}

/// Empty string clears an optional value
fn optional(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn parse_bool(value: &str) -> CdnResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(CdnError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> CdnResult<T> {
    value
        .parse()
        .map_err(|_| CdnError::User(format!("Invalid number: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_nested_keys() {
        let mut config = Config::default();
        apply_key(&mut config, "cache.ttl_ms", "0").unwrap();
        apply_key(&mut config, "features.preview", "yes").unwrap();
        apply_key(&mut config, "transform.max_width", "640").unwrap();
        apply_key(&mut config, "transform.command", "minify {source} {target}").unwrap();

        assert_eq!(config.cache.ttl_ms, 0);
        assert!(config.features.preview);
        assert_eq!(config.transform.max_width, Some(640));
        assert_eq!(config.transform.command, vec!["minify", "{source}", "{target}"]);
    }

    #[test]
    fn headers_are_added_and_removed() {
        let mut config = Config::default();
        apply_key(&mut config, "headers.X-Powered-By", "microcdn").unwrap();
        assert_eq!(config.headers["X-Powered-By"], "microcdn");

        apply_key(&mut config, "headers.X-Powered-By", "").unwrap();
        assert!(config.headers.is_empty());
    }

    #[test]
    fn empty_value_clears_optionals() {
        let mut config = Config::default();
        apply_key(&mut config, "cache.dest", "/var/cache/cdn").unwrap();
        assert_eq!(config.cache.dest, Some(PathBuf::from("/var/cache/cdn")));
        apply_key(&mut config, "cache.dest", "").unwrap();
        assert_eq!(config.cache.dest, None);
    }

    #[test]
    fn rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply_key(&mut config, "cache.nope", "1").is_err());
        assert!(apply_key(&mut config, "server.port", "http").is_err());
        assert!(apply_key(&mut config, "features.preview", "maybe").is_err());
        assert!(apply_key(&mut config, "log.format", "xml").is_err());
        assert!(apply_key(&mut config, "headers.", "x").is_err());
    }
}
