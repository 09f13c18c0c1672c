use super::{json_pretty, lock_root, CommandResult, EXIT_SUCCESS};
use capsa_core::Manager;

pub fn run(manager: &Manager, json: bool) -> CommandResult {
    let _lock = lock_root(manager)?;
    let removed = manager.clean()?;
    if json {
        let payload = serde_json::json!({ "removed_staging_entries": removed });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("clean: removed {removed} staging entries");
    }
    Ok(EXIT_SUCCESS)
}
