use crate::layout::StoreLayout;
use crate::StoreError;
use capsa_schema::PackageName;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extra names under a package's `bin/` that alias its launcher, so the
/// sandbox runtime can reach a shell and resolve `#!/usr/bin/env` scripts.
pub const LAUNCHER_ALIASES: [&str; 2] = ["sh", "env"];

fn launcher_script(name: &PackageName, runner: &str) -> String {
    format!(
        "#!/bin/sh\n\
         # capsa launcher for {name}\n\
         pkg=$(cd -- \"$(dirname -- \"$(readlink -f -- \"$0\")\")/..\" && pwd)\n\
         exec {runner} \"$pkg/rootfs\" \"$(basename -- \"$0\")\" \"$@\"\n"
    )
}

/// Write `bin/<name>` and its alias links into a (staging) package directory.
///
/// The launcher runs whatever name it was invoked under, so the global
/// symlink and each alias dispatch to the matching command in the rootfs.
pub fn install_launcher(
    pkg_dir: &Path,
    name: &PackageName,
    runner: &str,
) -> Result<(), StoreError> {
    let bin = StoreLayout::bin_in(pkg_dir);
    fs::create_dir_all(&bin)?;

    let launcher = StoreLayout::launcher_in(pkg_dir, name);
    fs::write(&launcher, launcher_script(name, runner))?;
    fs::set_permissions(&launcher, fs::Permissions::from_mode(0o755))?;

    for alias in LAUNCHER_ALIASES {
        if alias == name.as_str() {
            continue;
        }
        symlink(name.as_str(), bin.join(alias))?;
    }
    Ok(())
}

/// Relative target of the global symlink, valid wherever the root is moved.
fn global_link_target(name: &PackageName) -> PathBuf {
    Path::new("..")
        .join("packages")
        .join(name)
        .join("bin")
        .join(name)
}

/// Create or replace `<root>/bin/<name>` atomically.
pub fn link_global(layout: &StoreLayout, name: &PackageName) -> Result<(), StoreError> {
    let bin_dir = layout.bin_dir();
    fs::create_dir_all(&bin_dir)?;

    let link = layout.global_link(name);
    let tmp = bin_dir.join(format!(".{name}.capsa-link"));
    let _ = fs::remove_file(&tmp);
    symlink(global_link_target(name), &tmp)?;
    fs::rename(&tmp, &link)?;
    debug!("linked {}", link.display());
    Ok(())
}

/// Remove `<root>/bin/<name>` if present.
pub fn unlink_global(layout: &StoreLayout, name: &PackageName) -> Result<(), StoreError> {
    match fs::remove_file(layout.global_link(name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
