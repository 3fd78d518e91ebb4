//! Command-line interface.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands, RunArgs};

/// Print an error the way the selected output mode expects.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) {
    if json_mode {
        let body = serde_json::json!({ "error": format!("{err:#}") });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err:#}", console::style("error:").red().bold());
    }
}
