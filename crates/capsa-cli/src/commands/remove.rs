use super::{json_pretty, lock_root, parse_name, CommandResult, EXIT_SUCCESS};
use capsa_core::Manager;

pub fn run(manager: &Manager, name: &str, json: bool) -> CommandResult {
    let name = parse_name(name)?;
    let _lock = lock_root(manager)?;
    manager.remove(&name)?;
    if json {
        let payload = serde_json::json!({ "name": name, "status": "removed" });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("removed {name}");
    }
    Ok(EXIT_SUCCESS)
}
