//! External transformer program
//!
//! Runs `transform.command` with `{source}` and `{target}` substituted in
//! its arguments. Options travel as `MICROCDN_*` environment variables.
//! The program is responsible for every variant and every sidecar.

use crate::error::{CdnError, CdnResult};
use crate::transform::{TransformOptions, Transformer};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Lines of combined output kept in a `BuildFailed` reason
const OUTPUT_TAIL_LINES: usize = 50;

/// Transformer backed by an external program
#[derive(Debug, Clone)]
pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
}

impl CommandTransformer {
    /// Create from a command line; the first element is the program
    pub fn new(command: &[String]) -> CdnResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CdnError::User("transform.command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn render_args(&self, source: &Path, target: &Path) -> Vec<String> {
        let source = source.to_string_lossy();
        let target = target.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{source}", &source).replace("{target}", &target))
            .collect()
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn option_env(options: &TransformOptions) -> CdnResult<Vec<(&'static str, String)>> {
    let flag = |on: bool| (if on { "1" } else { "0" }).to_string();
    let mut env = vec![
        ("MICROCDN_PREVIEW", flag(options.preview)),
        ("MICROCDN_SOURCE_MAP", flag(options.source_map)),
        ("MICROCDN_NO_MINIFY", flag(options.no_minify)),
        ("MICROCDN_NO_IMPORT", flag(options.no_import)),
        ("MICROCDN_HEADERS", serde_json::to_string(&options.headers)?),
    ];
    if let Some(width) = options.max_width {
        env.push(("MICROCDN_MAX_WIDTH", width.to_string()));
    }
    if let Some(height) = options.max_height {
        env.push(("MICROCDN_MAX_HEIGHT", height.to_string()));
    }
    Ok(env)
}

fn output_tail(stdout: &[u8], stderr: &[u8]) -> String {
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(stdout),
        String::from_utf8_lossy(stderr)
    );
    let lines: Vec<&str> = combined.lines().collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl Transformer for CommandTransformer {
    async fn transform(
        &self,
        source: &Path,
        target: &Path,
        options: &TransformOptions,
    ) -> CdnResult<()> {
        let args = self.render_args(source, target);
        let command_line = self.command_line(&args);
        debug!("Executing: {}", command_line);

        let output = Command::new(&self.program)
            .args(&args)
            .envs(option_env(options)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CdnError::command_failed(command_line.clone(), e))?;

        if output.status.success() {
            Ok(())
        } else {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            Err(CdnError::build_failed(
                target,
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    code,
                    output_tail(&output.stdout, &output.stderr)
                ),
            ))
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
