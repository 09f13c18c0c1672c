use super::{json_pretty, CommandResult, EXIT_SUCCESS};
use capsa_core::Manager;

pub fn run(manager: &Manager, json: bool) -> CommandResult {
    let packages = manager.list()?;
    if json {
        println!("{}", json_pretty(&packages)?);
    } else if packages.is_empty() {
        println!("no packages installed");
    } else {
        println!("{:<24} {:<7} BUILD ARGUMENTS", "NAME", "LINKED");
        for pkg in &packages {
            let linked = if pkg.linked { "yes" } else { "no" };
            let recipe = pkg.recipe.as_deref().unwrap_or("-");
            println!("{:<24} {:<7} {recipe}", pkg.name, linked);
        }
    }
    Ok(EXIT_SUCCESS)
}
