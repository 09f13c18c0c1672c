use super::{
    colorize_status, json_pretty, lock_root, maybe_spinner, spin_fail, spin_ok, CommandResult,
    EXIT_SUCCESS,
};
use capsa_core::{Manager, RebuildOutcome};

pub fn run(manager: &Manager, json: bool) -> CommandResult {
    let _lock = lock_root(manager)?;

    let pb = maybe_spinner(json, "upgrading packages...");
    let results = match manager.upgrade() {
        Ok(r) => {
            spin_ok(pb.as_ref(), &format!("upgraded {} packages", r.len()));
            r
        }
        Err(e) => {
            spin_fail(pb.as_ref(), "upgrade stopped");
            return Err(e.into());
        }
    };

    if json {
        let payload: Vec<_> = results
            .iter()
            .map(|(name, outcome)| serde_json::json!({ "name": name, "outcome": outcome }))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (name, outcome) in &results {
            let status = match outcome {
                RebuildOutcome::Rebuilt { .. } => "rebuilt",
                RebuildOutcome::Skipped => "skipped",
            };
            println!("{name:<24} {}", colorize_status(status));
        }
    }
    Ok(EXIT_SUCCESS)
}
