use crate::layout::StoreLayout;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// A single rollback step that can undo part of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackStep {
    /// Remove a directory tree (e.g. an abandoned replay root).
    RemoveDir(PathBuf),
    /// Move `from` back to `to`, only if `from` exists and `to` does not.
    Rename { from: PathBuf, to: PathBuf },
}

/// The type of mutating operation being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOpKind {
    Exchange,
    Replay,
}

impl std::fmt::Display for WalOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalOpKind::Exchange => write!(f, "exchange"),
            WalOpKind::Replay => write!(f, "replay"),
        }
    }
}

/// A WAL entry representing an in-flight operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub op_id: String,
    pub kind: WalOpKind,
    pub target: String,
    pub timestamp: String,
    pub rollback_steps: Vec<RollbackStep>,
}

/// Write-ahead log for crash recovery.
///
/// An operation creates an entry before its first side effect, appends a
/// rollback step before each further side effect, and removes the entry on
/// completion. Entries still present at startup are rolled back in reverse.
pub struct WriteAheadLog {
    wal_dir: PathBuf,
}

impl WriteAheadLog {
    pub fn new(layout: &StoreLayout) -> Self {
        Self::in_dir(layout.wal_dir())
    }

    pub fn in_dir(wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_dir: wal_dir.into(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        Ok(())
    }

    /// Begin a new WAL entry. Returns the op_id.
    pub fn begin(&self, kind: WalOpKind, target: &str) -> Result<String, StoreError> {
        let op_id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f"),
            &blake3::hash(target.as_bytes()).to_hex()[..8]
        );
        let entry = WalEntry {
            op_id: op_id.clone(),
            kind,
            target: target.to_owned(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            rollback_steps: Vec::new(),
        };
        self.write_entry(&entry)?;
        debug!("WAL begin: {kind} for {target} (op_id={op_id})");
        Ok(op_id)
    }

    pub fn add_rollback_step(&self, op_id: &str, step: RollbackStep) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.rollback_steps.push(step);
        self.write_entry(&entry)
    }

    /// Commit (remove) a WAL entry after successful completion.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("WAL commit: {op_id}");
        }
        Ok(())
    }

    pub fn list_incomplete(&self) -> Result<Vec<WalEntry>, StoreError> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.wal_dir)? {
            let path = dir_entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                match fs::read_to_string(&path)
                    .map_err(StoreError::from)
                    .and_then(|c| serde_json::from_str::<WalEntry>(&c).map_err(StoreError::from))
                {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("corrupt WAL entry {}: {e}", path.display());
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Roll back all incomplete entries, newest first, so an operation
    /// nested inside another is undone before its enclosing one. Returns how
    /// many were rolled back.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let entries = self.list_incomplete()?;
        let count = entries.len();
        for entry in entries.iter().rev() {
            info!(
                "WAL recovery: rolling back {} on {} (op_id={})",
                entry.kind, entry.target, entry.op_id
            );
            rollback_entry(entry);
            let _ = fs::remove_file(self.entry_path(&entry.op_id));
        }
        if count > 0 {
            info!("WAL recovery complete: {count} entries rolled back");
        }
        Ok(count)
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.wal_dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &WalEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.wal_dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(&entry.op_id))
            .map_err(|e| StoreError::Io(e.error))?;
        crate::fsync_dir(&self.wal_dir)?;
        Ok(())
    }

    fn read_entry(&self, op_id: &str) -> Result<WalEntry, StoreError> {
        let content = fs::read_to_string(self.entry_path(op_id))?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn rollback_entry(entry: &WalEntry) {
    for step in entry.rollback_steps.iter().rev() {
        match step {
            RollbackStep::RemoveDir(path) => {
                if path.exists() {
                    if let Err(e) = fs::remove_dir_all(path) {
                        warn!("WAL rollback: failed to remove dir {}: {e}", path.display());
                    } else {
                        debug!("WAL rollback: removed dir {}", path.display());
                    }
                }
            }
            RollbackStep::Rename { from, to } => {
                if !exists(from) || exists(to) {
                    continue;
                }
                if let Err(e) = fs::rename(from, to) {
                    warn!(
                        "WAL rollback: failed to move {} back to {}: {e}",
                        from.display(),
                        to.display()
                    );
                } else {
                    debug!(
                        "WAL rollback: moved {} back to {}",
                        from.display(),
                        to.display()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, WriteAheadLog) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let wal = WriteAheadLog::new(&layout);
        wal.initialize().unwrap();
        (dir, wal)
    }

    #[test]
    fn begin_creates_entry_and_commit_removes_it() {
        let (_dir, wal) = setup();
        let op = wal.begin(WalOpKind::Exchange, "/r/packages/a/rootfs").unwrap();
        assert_eq!(wal.list_incomplete().unwrap().len(), 1);
        wal.commit(&op).unwrap();
        assert!(wal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn rollback_steps_are_persisted_in_order() {
        let (dir, wal) = setup();
        let op = wal.begin(WalOpKind::Exchange, "t").unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        wal.add_rollback_step(&op, RollbackStep::RemoveDir(a.clone()))
            .unwrap();
        wal.add_rollback_step(
            &op,
            RollbackStep::Rename {
                from: a.clone(),
                to: b.clone(),
            },
        )
        .unwrap();
        let entries = wal.list_incomplete().unwrap();
        assert_eq!(
            entries[0].rollback_steps,
            vec![RollbackStep::RemoveDir(a.clone()), RollbackStep::Rename { from: a, to: b }]
        );
    }

    #[test]
    fn recover_removes_dirs_and_moves_back() {
        let (dir, wal) = setup();
        let orphan = dir.path().join("orphan");
        let parked = dir.path().join("parked");
        let original = dir.path().join("original");
        fs::create_dir_all(&orphan).unwrap();
        fs::create_dir_all(&parked).unwrap();

        let op = wal.begin(WalOpKind::Exchange, "t").unwrap();
        wal.add_rollback_step(&op, RollbackStep::RemoveDir(orphan.clone()))
            .unwrap();
        wal.add_rollback_step(
            &op,
            RollbackStep::Rename {
                from: parked.clone(),
                to: original.clone(),
            },
        )
        .unwrap();

        assert_eq!(wal.recover().unwrap(), 1);
        assert!(!orphan.exists());
        assert!(!parked.exists());
        assert!(original.is_dir());
        assert!(wal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn rename_step_never_overwrites() {
        let (dir, wal) = setup();
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        fs::create_dir_all(&from).unwrap();
        fs::create_dir_all(&to).unwrap();
        fs::write(to.join("keep"), "x").unwrap();

        let op = wal.begin(WalOpKind::Exchange, "t").unwrap();
        wal.add_rollback_step(
            &op,
            RollbackStep::Rename {
                from: from.clone(),
                to: to.clone(),
            },
        )
        .unwrap();
        wal.recover().unwrap();

        assert!(from.exists());
        assert!(to.join("keep").exists());
    }

    #[test]
    fn nested_entries_roll_back_newest_first() {
        let (dir, wal) = setup();
        let staging = dir.path().join("staging");
        let live = dir.path().join("live");
        fs::create_dir_all(&live).unwrap();

        let outer = wal.begin(WalOpKind::Replay, "root").unwrap();
        wal.add_rollback_step(&outer, RollbackStep::RemoveDir(staging.clone()))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let inner = wal.begin(WalOpKind::Exchange, "root").unwrap();
        wal.add_rollback_step(
            &inner,
            RollbackStep::Rename {
                from: live.clone(),
                to: staging.clone(),
            },
        )
        .unwrap();

        // Inner first moves `live` to `staging`, then outer removes it.
        assert_eq!(wal.recover().unwrap(), 2);
        assert!(!live.exists());
        assert!(!staging.exists());
    }

    #[test]
    fn corrupt_entries_are_dropped() {
        let (dir, wal) = setup();
        let layout = StoreLayout::new(dir.path());
        fs::write(layout.wal_dir().join("bad.json"), "{not json").unwrap();
        assert!(wal.list_incomplete().unwrap().is_empty());
        assert!(!layout.wal_dir().join("bad.json").exists());
    }
}
