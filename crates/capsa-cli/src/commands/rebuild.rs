use super::{
    colorize_status, json_pretty, lock_root, maybe_spinner, parse_name, spin_fail, spin_ok,
    CommandResult, Failure, EXIT_SUCCESS,
};
use capsa_core::{shutdown_requested, CoreError, Manager, RebuildOutcome};

/// Rebuild the named packages in order, stopping at the first failure.
pub fn run(manager: &Manager, names: &[String], json: bool) -> CommandResult {
    let names = names
        .iter()
        .map(|n| parse_name(n))
        .collect::<Result<Vec<_>, Failure>>()?;
    let _lock = lock_root(manager)?;

    let mut results = Vec::with_capacity(names.len());
    for name in names {
        if shutdown_requested() {
            return Err(CoreError::Interrupted.into());
        }
        let pb = maybe_spinner(json, &format!("rebuilding {name}..."));
        match manager.rebuild(&name) {
            Ok(outcome) => {
                spin_ok(pb.as_ref(), &format!("{name} done"));
                results.push((name, outcome));
            }
            Err(e) => {
                spin_fail(pb.as_ref(), &format!("{name} {}", colorize_status("failed")));
                return Err(CoreError::Sweep {
                    name,
                    source: Box::new(e),
                }
                .into());
            }
        }
    }

    if json {
        let payload: Vec<_> = results
            .iter()
            .map(|(name, outcome)| serde_json::json!({ "name": name, "outcome": outcome }))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (name, outcome) in &results {
            match outcome {
                RebuildOutcome::Rebuilt { snapshot } => {
                    println!("{name:<24} {} ({snapshot})", colorize_status("rebuilt"));
                }
                RebuildOutcome::Skipped => {
                    println!(
                        "{name:<24} {} (no build arguments recorded)",
                        colorize_status("skipped")
                    );
                }
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
