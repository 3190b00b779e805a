use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::TxnResult;

/// Suffix for private backup copies taken before a file is mutated.
const BACKUP_SUFFIX: &str = "cask-bak";

/// Suffix for files/directories staged for removal.
const REMOVED_SUFFIX: &str = "cask-removed";

/// Sibling path holding the pre-mutation backup of `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, BACKUP_SUFFIX)
}

/// Sibling path a removal of `path` is staged at until `clean`.
pub fn removed_path(path: &Path) -> PathBuf {
    with_suffix(path, REMOVED_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// What `pending` observed about a path before mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
enum PriorState {
    /// The file existed; a backup copy was taken.
    BackedUp,
    /// The file did not exist; rollback deletes it.
    Absent,
}

/// Per-path backup store backing an in-flight transaction.
///
/// `pending` declares intent to mutate a path and snapshots it; `rollback`
/// restores the snapshot (or deletes the file if it did not exist before);
/// `clean` discards the snapshot once the transaction has committed. Backups
/// live alongside the originals under a deterministic naming convention so
/// they can always be found again.
#[derive(Debug, Default)]
pub struct BackupStore {
    tracked: HashMap<PathBuf, PriorState>,
}

impl BackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths currently tracked.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Returns `true` if no paths are tracked.
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Declare intent to mutate `path`. If the file currently exists a
    /// private backup copy is taken; either way the prior state is recorded
    /// so `rollback` can restore it. Idempotent within one transaction: the
    /// first snapshot wins.
    pub fn pending(&mut self, path: &Path) -> TxnResult<()> {
        if self.tracked.contains_key(path) {
            return Ok(());
        }
        let state = if path.exists() {
            fs::copy(path, backup_path(path))?;
            PriorState::BackedUp
        } else {
            PriorState::Absent
        };
        self.tracked.insert(path.to_path_buf(), state);
        Ok(())
    }

    /// Restore the pre-mutation state of `path`. A path that was never
    /// declared pending is a no-op.
    pub fn rollback(&mut self, path: &Path) -> TxnResult<()> {
        match self.tracked.remove(path) {
            Some(PriorState::BackedUp) => {
                fs::rename(backup_path(path), path)?;
            }
            Some(PriorState::Absent) => {
                if path.exists() {
                    fs::remove_file(path)?;
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Discard the backup for `path` after a successful commit. Failures to
    /// delete the backup are logged, not propagated: the commit already
    /// happened and a stray backup file is harmless.
    pub fn clean(&mut self, path: &Path) {
        if let Some(PriorState::BackedUp) = self.tracked.remove(path) {
            let backup = backup_path(path);
            if let Err(e) = fs::remove_file(&backup) {
                warn!(path = %backup.display(), error = %e, "failed to remove backup");
            }
        }
    }
}
