//! CLI presentation
//!
//! `cliclack` and `indicatif` in a terminal, plain bracketed lines in CI or
//! when output is piped.

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, outro_warn, remark, step_error_detail, step_ok,
    step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::{TaskSpinner, WarmProgress};
pub use prompts::confirm;
pub use theme::{init_theme, CdnTheme};
