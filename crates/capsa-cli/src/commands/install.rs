use super::{
    json_pretty, lock_root, maybe_spinner, parse_name, spin_fail, spin_ok, CommandResult,
    EXIT_SUCCESS,
};
use capsa_core::Manager;
use capsa_schema::NAME_PLACEHOLDER;

pub fn run(manager: &Manager, name: &str, tokens: &[String], json: bool) -> CommandResult {
    let explicit = if name == NAME_PLACEHOLDER {
        None
    } else {
        Some(parse_name(name)?)
    };
    let _lock = lock_root(manager)?;

    let pb = maybe_spinner(json, "building package...");
    let installed = match manager.install(explicit.as_ref(), tokens) {
        Ok(p) => {
            spin_ok(pb.as_ref(), &format!("installed {}", p.name));
            p
        }
        Err(e) => {
            spin_fail(pb.as_ref(), "install failed");
            return Err(e.into());
        }
    };

    if json {
        println!("{}", json_pretty(&installed)?);
    } else {
        println!(
            "{} -> {}",
            manager.layout().global_link(&installed.name).display(),
            installed.launcher.display()
        );
    }
    Ok(EXIT_SUCCESS)
}
