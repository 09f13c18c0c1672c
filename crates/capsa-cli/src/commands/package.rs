use super::{
    json_pretty, lock_root, maybe_spinner, parse_name, spin_fail, spin_ok, CommandResult,
    EXIT_SUCCESS,
};
use capsa_core::Manager;
use std::path::Path;

pub fn run(manager: &Manager, name: &str, out: &Path, json: bool) -> CommandResult {
    let name = parse_name(name)?;
    let _lock = lock_root(manager)?;

    let pb = maybe_spinner(json, &format!("packaging {name}..."));
    let archive = match manager.package(&name, out) {
        Ok(path) => {
            spin_ok(pb.as_ref(), &format!("packaged {name}"));
            path
        }
        Err(e) => {
            spin_fail(pb.as_ref(), "packaging failed");
            return Err(e.into());
        }
    };

    if json {
        let payload = serde_json::json!({ "name": name, "archive": archive });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", archive.display());
    }
    Ok(EXIT_SUCCESS)
}
