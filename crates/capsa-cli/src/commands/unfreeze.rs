use super::{
    json_pretty, lock_root, maybe_spinner, spin_fail, spin_ok, CommandResult, EXIT_SUCCESS,
};
use capsa_core::Manager;
use std::path::Path;

pub fn run(manager: &Manager, file: &Path, json: bool) -> CommandResult {
    let _lock = lock_root(manager)?;

    let pb = maybe_spinner(json, &format!("replaying {}...", file.display()));
    let installed = match manager.unfreeze(file) {
        Ok(names) => {
            spin_ok(pb.as_ref(), &format!("replayed {} packages", names.len()));
            names
        }
        Err(e) => {
            spin_fail(pb.as_ref(), "unfreeze failed; install root left unchanged");
            return Err(e.into());
        }
    };

    if json {
        println!("{}", json_pretty(&installed)?);
    } else {
        for name in &installed {
            println!("{name}");
        }
    }
    Ok(EXIT_SUCCESS)
}
