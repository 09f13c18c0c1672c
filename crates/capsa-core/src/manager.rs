use crate::concurrency::{shutdown_requested, StoreLock};
use crate::config::Config;
use crate::infer::{infer_command, new_executables};
use crate::CoreError;
use capsa_engine::{select_engine, BuildEngine};
use capsa_schema::{FreezeRecord, PackageName, Recipe, SnapshotId};
use capsa_store::{
    exchange, install_launcher, link_global, rename_noreplace, unlink_global, write_recipe,
    ExchangeMode, PackageStore, StoreError, StoreLayout, WriteAheadLog,
};
use serde::Serialize;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

const ROOTFS_MODE: u32 = 0o755;

/// Result of a successful install.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledPackage {
    pub name: PackageName,
    pub snapshot: SnapshotId,
    pub launcher: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RebuildOutcome {
    Rebuilt { snapshot: SnapshotId },
    /// The package has no recipe to rebuild from.
    Skipped,
}

/// One row of `capsa list`.
#[derive(Debug, Clone, Serialize)]
pub struct PackageInfo {
    pub name: PackageName,
    /// The rendered recipe line, absent for hand-made packages.
    pub recipe: Option<String>,
    pub linked: bool,
}

/// Package lifecycle manager for one install root.
///
/// Every mutation is assembled in a staging directory under the root and
/// made visible with a single rename or exchange, so a package is either
/// fully present or absent.
pub struct Manager {
    config: Config,
    layout: StoreLayout,
    packages: PackageStore,
    wal: WriteAheadLog,
    pub(crate) engine: Arc<dyn BuildEngine>,
}

impl Manager {
    /// Create a manager with the engine named in `config`.
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let engine = select_engine(&config.engine)?;
        Ok(Self::with_engine(config, Arc::from(engine)))
    }

    /// Create a manager around an existing engine.
    ///
    /// Incomplete journaled operations from a previous run are rolled back
    /// first, unless another process currently holds the store lock.
    pub fn with_engine(config: Config, engine: Arc<dyn BuildEngine>) -> Self {
        let layout = StoreLayout::new(&config.root);
        let packages = PackageStore::new(layout.clone());
        let wal = WriteAheadLog::new(&layout);

        let replay_wal = WriteAheadLog::in_dir(layout.replay_wal_dir());
        if layout.state_dir().is_dir() || layout.replay_wal_dir().is_dir() {
            match StoreLock::try_acquire(&layout.lock_file()) {
                Ok(Some(_lock)) => {
                    for journal in [&wal, &replay_wal] {
                        if let Err(e) = journal.recover() {
                            warn!("WAL recovery failed: {e}");
                        }
                    }
                }
                Ok(None) => debug!("store lock held; skipping WAL recovery"),
                Err(e) => warn!("store lock check failed; skipping WAL recovery: {e}"),
            }
        }

        Self {
            config,
            layout,
            packages,
            wal,
            engine,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn require_installed(&self, name: &PackageName) -> Result<(), CoreError> {
        if self.packages.exists(name) {
            Ok(())
        } else {
            Err(CoreError::NotInstalled(name.to_string()))
        }
    }

    /// Whether `name` is the package the running manager itself lives in,
    /// either by command name or by executable path on the host.
    fn hosts_running_manager(&self, name: &PackageName, pkg_dir: &Path) -> bool {
        if name.as_str() == self.config.self_command() {
            return true;
        }
        match (self.config.self_exe(), fs::canonicalize(pkg_dir)) {
            (Some(exe), Ok(pkg)) => exe.starts_with(pkg),
            _ => false,
        }
    }

    /// Create the store on first use and make sure the engine is ready to
    /// build.
    fn prepare(&self) -> Result<(), CoreError> {
        self.layout.initialize()?;
        self.engine.init()?;
        Ok(())
    }

    fn staging(&self, prefix: &str) -> Result<TempDir, CoreError> {
        Ok(tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(self.layout.staging_dir())?)
    }

    /// Materialize `snapshot` as the runnable `rootfs/` of `pkg_dir`.
    fn stage_rootfs(&self, snapshot: &SnapshotId, pkg_dir: &Path) -> Result<(), CoreError> {
        let rootfs = StoreLayout::rootfs_in(pkg_dir);
        self.engine.shallow_copy(snapshot, &rootfs)?;
        fs::set_permissions(&rootfs, fs::Permissions::from_mode(ROOTFS_MODE))?;
        fs::create_dir_all(StoreLayout::mount_point_in(pkg_dir))?;
        Ok(())
    }

    /// Install a package from build arguments.
    ///
    /// With `name` absent the entry point is inferred from the executables
    /// the build introduced on top of the bootstrap layers.
    pub fn install(
        &self,
        name: Option<&PackageName>,
        tokens: &[String],
    ) -> Result<InstalledPackage, CoreError> {
        let recipe = Recipe::new(tokens.to_vec())?;
        if let Some(name) = name {
            if self.packages.exists(name) {
                return Err(CoreError::AlreadyInstalled(name.clone()));
            }
        }
        match name {
            Some(n) => info!("installing {n}"),
            None => info!("installing package with inferred name"),
        }
        self.prepare()?;

        let snapshot = self.engine.build(recipe.tokens())?;
        debug!("built snapshot {snapshot}");

        let staging = self.staging("install-")?;
        let pkg_dir = staging.path();
        fs::set_permissions(pkg_dir, fs::Permissions::from_mode(ROOTFS_MODE))?;
        self.stage_rootfs(&snapshot, pkg_dir)?;

        let base = self.engine.base_layer(&snapshot)?;
        let new = new_executables(
            &self.engine.list_executables(&snapshot)?,
            &self.engine.list_executables(&base)?,
        );
        debug!("new executables over base layer {base}: {new:?}");

        let name = match name {
            Some(name) => {
                if !new.contains(name.as_str()) {
                    return Err(CoreError::NotNewCommand {
                        name: name.clone(),
                        candidates: new.into_iter().collect(),
                    });
                }
                name.clone()
            }
            None => {
                let inferred = PackageName::parse(infer_command(&new, recipe.tokens())?)?;
                info!("inferred package name '{inferred}'");
                inferred
            }
        };
        if self.packages.exists(&name) {
            return Err(CoreError::AlreadyInstalled(name));
        }

        write_recipe(pkg_dir, &recipe)?;
        install_launcher(pkg_dir, &name, &self.config.launcher.runner)?;

        let target = self.layout.package_dir(&name);
        rename_noreplace(pkg_dir, &target).map_err(|e| match e {
            StoreError::AlreadyExists(_) => CoreError::AlreadyInstalled(name.clone()),
            other => other.into(),
        })?;
        // The staging directory is now the package; its guard finds nothing
        // left to delete.
        drop(staging);

        link_global(&self.layout, &name)?;
        self.engine.map_set(&name, &snapshot)?;

        info!("installed {name} ({snapshot})");
        Ok(InstalledPackage {
            launcher: self.layout.global_link(&name),
            name,
            snapshot,
        })
    }

    /// Rebuild a package from its recipe and swap in the new rootfs.
    pub fn rebuild(&self, name: &PackageName) -> Result<RebuildOutcome, CoreError> {
        self.require_installed(name)?;
        let Some(recipe) = self.packages.read_recipe(name)? else {
            info!("{name} has no build arguments, skipping");
            return Ok(RebuildOutcome::Skipped);
        };
        info!("rebuilding {name}");
        self.prepare()?;

        let snapshot = self.engine.build(recipe.tokens())?;
        self.engine.map_release(name)?;

        let staging = self.staging("rebuild-")?;
        self.stage_rootfs(&snapshot, staging.path())?;
        let new_rootfs = StoreLayout::rootfs_in(staging.path());
        let live_rootfs = StoreLayout::rootfs_in(&self.layout.package_dir(name));

        if fs::symlink_metadata(&live_rootfs).is_ok() {
            if exchange(&live_rootfs, &new_rootfs, &self.wal)? == ExchangeMode::Journaled {
                warn!(
                    "{} does not support atomic exchange; used journaled renames",
                    live_rootfs.display()
                );
            }
        } else {
            warn!("{name} had no rootfs, promoting the new one");
            rename_noreplace(&new_rootfs, &live_rootfs)?;
        }

        // The previous generation now sits in staging.
        if let Err(e) = staging.close() {
            warn!("could not remove previous rootfs of {name}: {e}; run `capsa clean`");
        }

        self.engine.map_set(name, &snapshot)?;
        info!("rebuilt {name} ({snapshot})");
        Ok(RebuildOutcome::Rebuilt { snapshot })
    }

    /// Remove a package and its global launcher.
    pub fn remove(&self, name: &PackageName) -> Result<(), CoreError> {
        self.require_installed(name)?;
        let pkg_dir = self.layout.package_dir(name);
        let global_link = self.layout.global_link(name);

        if self.hosts_running_manager(name, &pkg_dir) {
            return Err(CoreError::SelfRemoval {
                name: name.clone(),
                package_dir: pkg_dir,
                global_link,
            });
        }

        info!("removing {name}");
        self.layout.initialize()?;
        self.engine.map_release(name)?;

        let trash = self.staging("remove-")?;
        rename_noreplace(&pkg_dir, &trash.path().join(name))?;
        unlink_global(&self.layout, name)?;
        self.engine.sudo(&[
            "rm".to_owned(),
            "-rf".to_owned(),
            trash.path().to_string_lossy().into_owned(),
        ])?;
        drop(trash);

        info!("removed {name}");
        Ok(())
    }

    /// Rebuild every package in name order after purging the engine cache.
    ///
    /// Stops at the first failure; packages after it are left untouched.
    pub fn upgrade(&self) -> Result<Vec<(PackageName, RebuildOutcome)>, CoreError> {
        info!("upgrading all packages");
        self.engine.purge()?;

        let mut report = Vec::new();
        for name in self.packages.list()? {
            if shutdown_requested() {
                return Err(CoreError::Interrupted);
            }
            let outcome = self.rebuild(&name).map_err(|e| CoreError::Sweep {
                name: name.clone(),
                source: Box::new(e),
            })?;
            report.push((name, outcome));
        }
        Ok(report)
    }

    /// Archive a package's launcher link and store entry into `out`
    /// (gzip-compressed tar).
    pub fn package(&self, name: &PackageName, out: &Path) -> Result<PathBuf, CoreError> {
        self.require_installed(name)?;
        let out = if out.is_absolute() {
            out.to_path_buf()
        } else {
            std::env::current_dir()?.join(out)
        };
        info!("packaging {name} into {}", out.display());

        self.engine.sudo(&[
            "tar".to_owned(),
            "-czf".to_owned(),
            out.to_string_lossy().into_owned(),
            "-C".to_owned(),
            self.layout.root().to_string_lossy().into_owned(),
            format!("bin/{name}"),
            format!("packages/{name}"),
        ])?;
        Ok(out)
    }

    pub fn list(&self) -> Result<Vec<PackageInfo>, CoreError> {
        let mut rows = Vec::new();
        for name in self.packages.list()? {
            let recipe = match self.packages.read_recipe(&name)? {
                Some(r) => Some(r.render()?),
                None => None,
            };
            let linked = fs::symlink_metadata(self.layout.global_link(&name)).is_ok();
            rows.push(PackageInfo {
                name,
                recipe,
                linked,
            });
        }
        Ok(rows)
    }

    /// Recipes of every package that has one, in name order.
    pub fn freeze(&self) -> Result<FreezeRecord, CoreError> {
        Ok(self.packages.freeze()?)
    }

    /// Drop the engine's build cache.
    pub fn purge(&self) -> Result<(), CoreError> {
        info!("purging engine cache");
        Ok(self.engine.purge()?)
    }

    /// Let the engine reclaim unreferenced snapshots and delete leftovers of
    /// interrupted operations from the staging area. Returns how many
    /// leftovers were removed.
    pub fn clean(&self) -> Result<usize, CoreError> {
        info!("cleaning");
        self.engine.clean()?;

        let staging = self.layout.staging_dir();
        if !staging.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&staging)? {
            let path = entry?.path();
            if fs::remove_dir_all(&path).is_err() {
                debug!("escalating removal of {}", path.display());
                self.engine.sudo(&[
                    "rm".to_owned(),
                    "-rf".to_owned(),
                    path.to_string_lossy().into_owned(),
                ])?;
            }
            removed += 1;
        }
        Ok(removed)
    }
}
