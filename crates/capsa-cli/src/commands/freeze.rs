use super::{CommandResult, EXIT_SUCCESS};
use capsa_core::{CoreError, Manager};
use std::io::Write;

/// Print the freeze file for the root to stdout.
pub fn run(manager: &Manager) -> CommandResult {
    let text = manager
        .freeze()?
        .to_text()
        .map_err(CoreError::from)?;
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(CoreError::from)?;
    Ok(EXIT_SUCCESS)
}
