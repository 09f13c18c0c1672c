//! Package lifecycle orchestration for capsa.
//!
//! This crate ties the schema, the on-disk store, and the build engine
//! together into the [`Manager`]: install, rebuild, remove, upgrade, package,
//! freeze and unfreeze. It also provides entry-point inference, explicit
//! configuration, and the store lock used by the CLI.

pub mod concurrency;
pub mod config;
pub mod infer;
pub mod manager;
pub mod replay;

pub use concurrency::{install_signal_handler, shutdown_requested, StoreLock};
pub use config::{default_config_path, expand_tilde, Config, ConfigError, LauncherConfig};
pub use infer::{infer_command, new_executables, InferenceError};
pub use manager::{InstalledPackage, Manager, PackageInfo, RebuildOutcome};

use capsa_schema::PackageName;
use std::path::PathBuf;
use thiserror::Error;

/// Exit status for every failure; success is 0.
pub const EXIT_FAILURE: u8 = 1;

/// Coarse classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed arguments, recipe or freeze file.
    Usage,
    /// Duplicate or missing package, or a refused removal.
    State,
    /// The build engine failed.
    Engine,
    /// The entry point could not be determined.
    Inference,
    /// Reading or writing local files failed.
    Io,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Usage(String),
    #[error("invalid package name: {0}")]
    InvalidName(#[from] capsa_schema::NameError),
    #[error("invalid build arguments: {0}")]
    Recipe(#[from] capsa_schema::RecipeError),
    #[error("freeze file error: {0}")]
    Freeze(#[from] capsa_schema::FreezeError),
    #[error("store error: {0}")]
    Store(#[from] capsa_store::StoreError),
    #[error("engine error: {0}")]
    Engine(#[from] capsa_engine::EngineError),
    #[error("{0}")]
    Inference(#[from] InferenceError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("package '{0}' is already installed")]
    AlreadyInstalled(PackageName),
    #[error("package '{0}' is not installed")]
    NotInstalled(String),
    #[error(
        "'{name}' is not a command introduced by these build arguments (new commands: {})",
        candidate_list(.candidates)
    )]
    NotNewCommand {
        name: PackageName,
        candidates: Vec<String>,
    },
    #[error(
        "refusing to remove '{name}': it contains the running capsa executable; \
         delete {} and {} by hand if you really mean it",
        .package_dir.display(), .global_link.display()
    )]
    SelfRemoval {
        name: PackageName,
        package_dir: PathBuf,
        global_link: PathBuf,
    },
    #[error("store lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("interrupted")]
    Interrupted,
    #[error("{name}: {source}")]
    Sweep {
        name: PackageName,
        source: Box<CoreError>,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn candidate_list(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "none".to_owned()
    } else {
        candidates.join(", ")
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        use capsa_schema::FreezeError;
        use capsa_store::StoreError;

        match self {
            CoreError::Usage(_)
            | CoreError::InvalidName(_)
            | CoreError::Recipe(_)
            | CoreError::Config(_) => ErrorKind::Usage,
            CoreError::Freeze(FreezeError::Io(_)) => ErrorKind::Io,
            CoreError::Freeze(_) => ErrorKind::Usage,
            CoreError::Store(StoreError::InvalidName(_) | StoreError::Recipe(_)) => {
                ErrorKind::Usage
            }
            CoreError::Store(
                StoreError::AlreadyExists(_)
                | StoreError::NotFound(_)
                | StoreError::VersionMismatch { .. },
            )
            | CoreError::AlreadyInstalled(_)
            | CoreError::NotInstalled(_)
            | CoreError::SelfRemoval { .. }
            | CoreError::Lock { .. }
            | CoreError::Interrupted => ErrorKind::State,
            CoreError::Store(_) | CoreError::Io(_) => ErrorKind::Io,
            CoreError::Engine(_) => ErrorKind::Engine,
            CoreError::Inference(_) | CoreError::NotNewCommand { .. } => ErrorKind::Inference,
            CoreError::Sweep { source, .. } => source.kind(),
        }
    }

    /// Process exit status for this error. A sweep reports the status of
    /// the package that stopped it.
    pub fn exit_code(&self) -> u8 {
        match self {
            CoreError::Sweep { source, .. } => source.exit_code(),
            _ => EXIT_FAILURE,
        }
    }
}
