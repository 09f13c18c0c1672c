use super::{lock_root, maybe_spinner, spin_fail, spin_ok, CommandResult, EXIT_SUCCESS};
use capsa_core::Manager;

/// Drop every engine layer not associated with an installed package.
pub fn run(manager: &Manager, json: bool) -> CommandResult {
    let _lock = lock_root(manager)?;
    let pb = maybe_spinner(json, "purging unused layers...");
    if let Err(e) = manager.purge() {
        spin_fail(pb.as_ref(), "purge failed");
        return Err(e.into());
    }
    spin_ok(pb.as_ref(), "purged unused layers");
    Ok(EXIT_SUCCESS)
}
