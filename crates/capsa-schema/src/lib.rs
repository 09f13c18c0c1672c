//! Package names, build recipes, and the freeze file format for capsa.
//!
//! This crate defines the schema layer: validated identifiers (`PackageName`,
//! `SnapshotId`), the `Recipe` token list with its single-line shell-quoted
//! encoding stored as `buildargs`, and the `FreezeRecord` text format used to
//! replay a whole package set elsewhere.

pub mod freeze;
pub mod recipe;
pub mod types;

pub use freeze::{FreezeEntry, FreezeError, FreezeRecord, INSTALL_PREFIX};
pub use recipe::{is_option_like, Recipe, RecipeError};
pub use types::{NameError, PackageName, SnapshotId, NAME_PLACEHOLDER};
