//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// A spinner that degrades to plain lines
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Bar for `warm`: one tick per requested path
pub struct WarmProgress {
    bar: Option<ProgressBar>,
}

impl WarmProgress {
    pub fn new(ctx: &UiContext, total: u64) -> Self {
        let bar = if ctx.use_fancy_output() {
            let style = ProgressStyle::default_bar()
                .template("  {spinner:.magenta} Warming  {bar:24.magenta/dim} {pos}/{len} {msg:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━╸─");
            let bar = ProgressBar::new(total);
            bar.set_style(style);
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            println!("Warming {} asset(s)...", total);
            None
        };
        Self { bar }
    }

    /// Record the outcome for one path
    pub fn record(&self, path: &str, status: u16) {
        match &self.bar {
            Some(bar) => {
                bar.set_message(shorten(path));
                bar.inc(1);
            }
            None => println!("  {} {}", status_label(status), path),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn status_label(status: u16) -> String {
    match status {
        200..=299 => style(format!("[{}]", status)).green().to_string(),
        400..=499 => style(format!("[{}]", status)).yellow().to_string(),
        _ => style(format!("[{}]", status)).red().to_string(),
    }
}

/// Keep the tail of long paths so the bar fits on one line
fn shorten(path: &str) -> String {
    const MAX: usize = 48;
    let count = path.chars().count();
    if count <= MAX {
        return path.to_string();
    }
    let tail: String = path.chars().skip(count - (MAX - 3)).collect();
    format!("...{}", tail)
}
