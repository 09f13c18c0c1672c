//! On-disk package store for capsa.
//!
//! This crate provides the storage layer: `StoreLayout` for the install root
//! structure, `PackageStore` for enumerating packages and reading their
//! recipes, the atomic promotion/exchange primitives in [`atomic`], the
//! launcher and global symlink writers in [`launcher`], and a
//! `WriteAheadLog` backing the journaled exchange fallback.

pub mod atomic;
pub mod launcher;
pub mod layout;
pub mod packages;
pub mod wal;

pub use atomic::{exchange, exchange_journaled, rename_noreplace, ExchangeMode, NATIVE_EXCHANGE};
pub use launcher::{install_launcher, link_global, unlink_global, LAUNCHER_ALIASES};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use packages::{write_recipe, PackageStore};
pub use wal::{RollbackStep, WalOpKind, WriteAheadLog};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` inside it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid package name: {0}")]
    InvalidName(#[from] capsa_schema::NameError),
    #[error("invalid recipe: {0}")]
    Recipe(#[from] capsa_schema::RecipeError),
    #[error("refusing to overwrite existing path: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("package not found: {0}")]
    NotFound(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}
