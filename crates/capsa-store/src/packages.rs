use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use capsa_schema::{FreezeEntry, FreezeRecord, PackageName, Recipe};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

/// Write the `buildargs` recipe line into a (staging) package directory.
pub fn write_recipe(pkg_dir: &Path, recipe: &Recipe) -> Result<(), StoreError> {
    let line = recipe.render()?;
    let mut tmp = NamedTempFile::new_in(pkg_dir)?;
    tmp.write_all(line.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(StoreLayout::buildargs_in(pkg_dir))
        .map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(pkg_dir)?;
    Ok(())
}

/// Read-side view of the installed packages under a layout.
pub struct PackageStore {
    layout: StoreLayout,
}

impl PackageStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn exists(&self, name: &PackageName) -> bool {
        fs::symlink_metadata(self.layout.package_dir(name)).is_ok()
    }

    /// Installed package names, sorted.
    ///
    /// Entries that are not valid package names (leftovers, dotfiles) are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<PackageName>, StoreError> {
        let dir = self.layout.packages_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let raw = entry.file_name().to_string_lossy().into_owned();
            match PackageName::parse(raw.clone()) {
                Ok(name) => names.push(name),
                Err(e) => warn!("skipping unexpected store entry '{raw}': {e}"),
            }
        }
        names.sort();
        Ok(names)
    }

    /// The package's recipe, or `None` when it has no `buildargs` file.
    pub fn read_recipe(&self, name: &PackageName) -> Result<Option<Recipe>, StoreError> {
        if !self.exists(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let path = StoreLayout::buildargs_in(&self.layout.package_dir(name));
        match fs::read_to_string(&path) {
            Ok(line) => Ok(Some(Recipe::parse_line(&line)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// One entry per package that has a recipe, in name order.
    pub fn freeze(&self) -> Result<FreezeRecord, StoreError> {
        let mut entries = Vec::new();
        for name in self.list()? {
            if let Some(recipe) = self.read_recipe(&name)? {
                entries.push(FreezeEntry { name, recipe });
            }
        }
        Ok(FreezeRecord { entries })
    }
}
