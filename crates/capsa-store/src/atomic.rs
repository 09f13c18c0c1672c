//! Indivisible directory promotion and exchange.
//!
//! On Linux both operations map to a single `renameat2(2)` call. Elsewhere,
//! or when the filesystem rejects `renameat2`, promotion degrades to an
//! existence check plus `rename` and exchange degrades to three renames
//! journaled in the WAL. The journaled exchange can be observed half-done by
//! a concurrent reader, but a crash in the middle is rolled back to the
//! previous generation on the next start.

use crate::wal::{RollbackStep, WalOpKind, WriteAheadLog};
use crate::StoreError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Whether this platform has a kernel-level directory exchange.
pub const NATIVE_EXCHANGE: bool = cfg!(target_os = "linux");

/// How an [`exchange`] was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    /// One `renameat2(RENAME_EXCHANGE)` call.
    Native,
    /// Three renames recorded in the write-ahead log.
    Journaled,
}

#[derive(Debug, Clone, Copy)]
enum RenameFlag {
    NoReplace,
    Exchange,
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn renameat2(from: &Path, to: &Path, flag: RenameFlag) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let flags: libc::c_uint = match flag {
        RenameFlag::NoReplace => libc::RENAME_NOREPLACE,
        RenameFlag::Exchange => libc::RENAME_EXCHANGE,
    };
    let from = CString::new(from.as_os_str().as_bytes())?;
    let to = CString::new(to.as_os_str().as_bytes())?;
    // SAFETY: both pointers are valid NUL-terminated strings that outlive the call.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_renameat2,
            libc::AT_FDCWD,
            from.as_ptr(),
            libc::AT_FDCWD,
            to.as_ptr(),
            flags,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// `None` when the kernel or filesystem has no `renameat2` support.
#[cfg(target_os = "linux")]
fn native_rename(from: &Path, to: &Path, flag: RenameFlag) -> Option<io::Result<()>> {
    match renameat2(from, to, flag) {
        Err(e) if matches!(e.raw_os_error(), Some(libc::EINVAL | libc::ENOSYS)) => {
            warn!(
                "renameat2 {flag:?} unsupported for {}, falling back: {e}",
                to.display()
            );
            None
        }
        other => Some(other),
    }
}

#[cfg(not(target_os = "linux"))]
fn native_rename(_from: &Path, _to: &Path, _flag: RenameFlag) -> Option<io::Result<()>> {
    None
}

fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn sync_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        crate::fsync_dir(parent)?;
    }
    Ok(())
}

/// Move `from` to `to`, failing if `to` already exists.
pub fn rename_noreplace(from: &Path, to: &Path) -> Result<(), StoreError> {
    match native_rename(from, to, RenameFlag::NoReplace) {
        Some(Ok(())) => return sync_parent(to),
        Some(Err(e)) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StoreError::AlreadyExists(to.to_path_buf()));
        }
        Some(Err(e)) => return Err(e.into()),
        None => {}
    }

    if path_exists(to) {
        return Err(StoreError::AlreadyExists(to.to_path_buf()));
    }
    fs::rename(from, to)?;
    sync_parent(to)
}

/// Swap the identities of two existing paths.
///
/// After success `a` holds what was at `b` and vice versa.
pub fn exchange(a: &Path, b: &Path, wal: &WriteAheadLog) -> Result<ExchangeMode, StoreError> {
    match native_rename(a, b, RenameFlag::Exchange) {
        Some(Ok(())) => {
            sync_parent(a)?;
            if a.parent() != b.parent() {
                sync_parent(b)?;
            }
            debug!("exchanged {} <-> {}", a.display(), b.display());
            Ok(ExchangeMode::Native)
        }
        Some(Err(e)) => Err(e.into()),
        None => {
            exchange_journaled(a, b, wal)?;
            Ok(ExchangeMode::Journaled)
        }
    }
}

fn parking_path(a: &Path) -> PathBuf {
    let mut name = a.file_name().unwrap_or_default().to_os_string();
    name.push(".capsa-xchg");
    a.with_file_name(name)
}

/// Exchange `a` and `b` with three ordinary renames under a WAL entry.
///
/// Rollback steps are registered before each rename, so recovery after a
/// crash at any point puts the previous generation back at `a`.
pub fn exchange_journaled(a: &Path, b: &Path, wal: &WriteAheadLog) -> Result<(), StoreError> {
    if !path_exists(a) {
        return Err(StoreError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", a.display()),
        )));
    }
    if !path_exists(b) {
        return Err(StoreError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", b.display()),
        )));
    }

    let parked = parking_path(a);
    if path_exists(&parked) {
        return Err(StoreError::AlreadyExists(parked));
    }

    wal.initialize()?;
    let op = wal.begin(WalOpKind::Exchange, &a.to_string_lossy())?;

    let swap = || -> Result<(), StoreError> {
        wal.add_rollback_step(
            &op,
            RollbackStep::Rename {
                from: parked.clone(),
                to: a.to_path_buf(),
            },
        )?;
        fs::rename(a, &parked)?;

        wal.add_rollback_step(
            &op,
            RollbackStep::Rename {
                from: a.to_path_buf(),
                to: b.to_path_buf(),
            },
        )?;
        if let Err(e) = fs::rename(b, a) {
            let _ = fs::rename(&parked, a);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&parked, b) {
            let _ = fs::rename(a, b);
            let _ = fs::rename(&parked, a);
            return Err(e.into());
        }
        sync_parent(a)?;
        sync_parent(b)
    };

    let result = swap();
    finish_journaled(wal, &op, a, b, &parked, result)
}

/// Close the WAL entry of a journaled exchange. A failed exchange keeps its
/// entry unless both paths are back in place, so the next start can move the
/// parked generation home.
fn finish_journaled(
    wal: &WriteAheadLog,
    op: &str,
    a: &Path,
    b: &Path,
    parked: &Path,
    result: Result<(), StoreError>,
) -> Result<(), StoreError> {
    let settled = path_exists(a) && path_exists(b) && !path_exists(parked);
    if result.is_ok() || settled {
        wal.commit(op)?;
    } else {
        warn!(
            "exchange of {} could not be undone; it is rolled back on the next start",
            a.display()
        );
    }
    result
}
