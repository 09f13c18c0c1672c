//! Build engine client for capsa.
//!
//! The external build engine produces, caches, and materializes filesystem
//! snapshots. This crate wraps its narrow command surface behind the
//! `BuildEngine` trait, with a process-spawning `CliEngine` for real use and a
//! deterministic in-memory `MockEngine` for tests.

pub mod cli;
pub mod engine;
pub mod mock;

pub use cli::CliEngine;
pub use engine::{select_engine, BuildEngine, EngineConfig, EXECUTABLE_SCAN};
pub use mock::{MockEngine, SNAPSHOT_MARKER};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine command `{command}` failed ({}){}", status_text(.status), stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("unexpected output from `{command}`: {output:?}")]
    MalformedOutput { command: String, output: String },
    #[error("cannot derive layer chain from node path '{0}'")]
    MalformedNodePath(String),
    #[error("engine backend '{0}' is not available")]
    Unavailable(String),
}

fn status_text(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_owned(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}
