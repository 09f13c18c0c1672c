pub mod clean;
pub mod completions;
pub mod freeze;
pub mod install;
pub mod list;
pub mod package;
pub mod purge;
pub mod rebuild;
pub mod remove;
pub mod unfreeze;
pub mod upgrade;

use capsa_core::{CoreError, Manager, StoreLock, EXIT_FAILURE};
use capsa_schema::PackageName;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;

/// A failed command: the message printed after `error:` and the exit status.
#[derive(Debug)]
pub struct Failure {
    pub message: String,
    pub code: u8,
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        Self {
            code: e.exit_code(),
            message: e.to_string(),
        }
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self {
            message,
            code: EXIT_FAILURE,
        }
    }
}

pub type CommandResult = Result<u8, Failure>;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn parse_name(input: &str) -> Result<PackageName, Failure> {
    PackageName::parse(input).map_err(|e| Failure::from(CoreError::from(e)))
}

/// Take the root's store lock, telling the user when another capsa process
/// is holding it.
pub fn lock_root(manager: &Manager) -> Result<StoreLock, Failure> {
    let path = manager.layout().lock_file();
    if let Some(lock) = StoreLock::try_acquire(&path)? {
        return Ok(lock);
    }
    eprintln!(
        "waiting for another capsa process to release {}...",
        path.display()
    );
    Ok(StoreLock::acquire(&path)?)
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Spinner unless the output is machine-readable.
pub fn maybe_spinner(json: bool, msg: &str) -> Option<ProgressBar> {
    if json {
        None
    } else {
        Some(spinner(msg))
    }
}

pub fn spin_ok(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(plain_style());
        pb.finish_with_message(format!("✓ {msg}"));
    }
}

pub fn spin_fail(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(plain_style());
        pb.finish_with_message(format!("✗ {msg}"));
    }
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "rebuilt" | "installed" => Style::new().green().apply_to(status).to_string(),
        "skipped" => Style::new().yellow().apply_to(status).to_string(),
        "failed" => Style::new().red().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}
