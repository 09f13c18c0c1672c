//! Freeze file replay.
//!
//! A freeze file is replayed into a fresh root created next to the live one.
//! Only when every install has succeeded is that root exchanged with the live
//! root, so the destination shows either the old package set or the complete
//! new one.

use crate::concurrency::shutdown_requested;
use crate::manager::Manager;
use crate::CoreError;
use capsa_schema::{FreezeRecord, PackageName};
use capsa_store::{exchange, ExchangeMode, RollbackStep, WalOpKind, WriteAheadLog};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Manager {
    /// Replace the install root's package set with the one recorded in the
    /// freeze file at `path`.
    pub fn unfreeze(&self, path: &Path) -> Result<Vec<PackageName>, CoreError> {
        let record = FreezeRecord::parse_file(path)?;
        self.replay(&record)
    }

    pub fn replay(&self, record: &FreezeRecord) -> Result<Vec<PackageName>, CoreError> {
        let root = self.layout().root().to_path_buf();
        info!(
            "replaying {} packages into {}",
            record.entries.len(),
            root.display()
        );
        self.layout().initialize()?;

        let staging = tempfile::Builder::new()
            .prefix(&staging_prefix(&root))
            .tempdir_in(sibling_dir(&root))?;
        let journal_dir = self.layout().replay_wal_dir();
        let journal = WriteAheadLog::in_dir(&journal_dir);
        journal.initialize()?;
        let op = journal.begin(WalOpKind::Replay, &root.to_string_lossy())?;

        let result = self.replay_into(record, &root, staging.path(), &journal, &op);
        // After an exchange the staging path holds the previous root,
        // otherwise the partial new one. Both may hold engine-owned files.
        let leftover = staging.path().to_string_lossy().into_owned();
        let removed = self
            .engine
            .sudo(&["rm".to_owned(), "-rf".to_owned(), leftover.clone()]);
        drop(staging);
        // An unfinished exchange is rolled back on the next start and may
        // move the new root back to the staging path, which this entry then
        // removes.
        let exchange_pending = journal
            .list_incomplete()?
            .iter()
            .any(|entry| entry.op_id != op);
        match removed {
            Ok(()) if !exchange_pending => {
                journal.commit(&op)?;
                let _ = std::fs::remove_dir(&journal_dir);
            }
            Ok(()) => warn!(
                "exchange of {} did not finish; it is rolled back on the next start",
                root.display()
            ),
            Err(e) => {
                warn!("could not remove {leftover}: {e}; it is removed on the next start");
            }
        }
        result
    }

    fn replay_into(
        &self,
        record: &FreezeRecord,
        root: &Path,
        staging_root: &Path,
        journal: &WriteAheadLog,
        op: &str,
    ) -> Result<Vec<PackageName>, CoreError> {
        journal.add_rollback_step(op, RollbackStep::RemoveDir(staging_root.to_path_buf()))?;

        let scoped = Manager::with_engine(
            self.config().with_root(staging_root),
            Arc::clone(&self.engine),
        );
        scoped.layout().initialize()?;

        let mut installed = Vec::with_capacity(record.entries.len());
        for entry in &record.entries {
            if shutdown_requested() {
                return Err(CoreError::Interrupted);
            }
            debug!("replaying {}", entry.name);
            scoped
                .install(Some(&entry.name), entry.recipe.tokens())
                .map_err(|e| CoreError::Sweep {
                    name: entry.name.clone(),
                    source: Box::new(e),
                })?;
            installed.push(entry.name.clone());
        }

        if exchange(root, staging_root, journal)? == ExchangeMode::Journaled {
            warn!(
                "{} does not support atomic exchange; used journaled renames",
                root.display()
            );
        }
        info!("replayed {} packages", installed.len());
        Ok(installed)
    }
}

fn sibling_dir(root: &Path) -> PathBuf {
    match root.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn staging_prefix(root: &Path) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.replay-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_lives_next_to_root() {
        assert_eq!(
            sibling_dir(Path::new("/home/u/.local/share/capsa")),
            PathBuf::from("/home/u/.local/share")
        );
        assert_eq!(sibling_dir(Path::new("capsa")), PathBuf::from("."));
        assert_eq!(
            staging_prefix(Path::new("/srv/capsa")),
            ".capsa.replay-".to_owned()
        );
    }
}
