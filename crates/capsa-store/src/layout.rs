use crate::StoreError;
use capsa_schema::PackageName;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

const PACKAGES_DIR: &str = "packages";
const GLOBAL_BIN_DIR: &str = "bin";
const STATE_DIR: &str = ".capsa";

const ROOTFS_DIR: &str = "rootfs";
const BUILDARGS_FILE: &str = "buildargs";
const PACKAGE_BIN_DIR: &str = "bin";
const MOUNT_DIR: &str = ".capsa-mnt";

/// Directory layout of an install root.
///
/// ```text
/// <root>/packages/<name>/{rootfs/,buildargs,bin/}
/// <root>/bin/<name> -> ../packages/<name>/bin/<name>
/// <root>/.capsa/{version,lock,wal/,staging/}
/// ```
///
/// The package-relative helpers (`rootfs_in`, `buildargs_in`, ...) apply to
/// both installed package directories and staging directories, since a
/// staging directory is promoted into place as-is.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join(PACKAGES_DIR)
    }

    #[inline]
    pub fn package_dir(&self, name: &PackageName) -> PathBuf {
        self.packages_dir().join(name)
    }

    #[inline]
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join(GLOBAL_BIN_DIR)
    }

    #[inline]
    pub fn global_link(&self, name: &PackageName) -> PathBuf {
        self.bin_dir().join(name)
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Scratch space for in-progress installs, rebuilds, and removals.
    /// Lives inside the root so every promotion is a same-filesystem rename.
    #[inline]
    pub fn staging_dir(&self) -> PathBuf {
        self.state_dir().join("staging")
    }

    #[inline]
    pub fn wal_dir(&self) -> PathBuf {
        self.state_dir().join("wal")
    }

    /// Journal for operations that swap out the whole root. It has to live
    /// outside the root, next to it, so it survives the exchange.
    pub fn replay_wal_dir(&self) -> PathBuf {
        match (self.root.parent(), self.root.file_name()) {
            (Some(parent), Some(name)) => {
                parent.join(format!(".{}.capsa-wal", name.to_string_lossy()))
            }
            _ => self.state_dir().join("replay-wal"),
        }
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir().join("lock")
    }

    #[inline]
    pub fn rootfs_in(pkg_dir: &Path) -> PathBuf {
        pkg_dir.join(ROOTFS_DIR)
    }

    #[inline]
    pub fn buildargs_in(pkg_dir: &Path) -> PathBuf {
        pkg_dir.join(BUILDARGS_FILE)
    }

    #[inline]
    pub fn bin_in(pkg_dir: &Path) -> PathBuf {
        pkg_dir.join(PACKAGE_BIN_DIR)
    }

    #[inline]
    pub fn launcher_in(pkg_dir: &Path, name: &PackageName) -> PathBuf {
        Self::bin_in(pkg_dir).join(name)
    }

    /// Mount point the sandbox runtime binds into at launch time.
    #[inline]
    pub fn mount_point_in(pkg_dir: &Path) -> PathBuf {
        Self::rootfs_in(pkg_dir).join(MOUNT_DIR)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.packages_dir())?;
        fs::create_dir_all(self.bin_dir())?;
        fs::create_dir_all(self.staging_dir())?;
        fs::create_dir_all(self.wal_dir())?;

        let state_dir = self.state_dir();
        let version_path = state_dir.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&state_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&state_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.state_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
