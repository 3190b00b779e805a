use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::backup::{removed_path, BackupStore};
use crate::error::TxnResult;

/// Shared state for executing actions within one transaction.
#[derive(Debug, Default)]
pub struct ActionContext {
    pub backups: BackupStore,
    /// Directories this transaction created (so undo knows not to remove
    /// pre-existing ones).
    created_dirs: HashSet<PathBuf>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One reversible filesystem mutation.
///
/// The action set is closed and known at compile time, so dispatch is a
/// plain `match` rather than a trait object. Each kind implements the same
/// four-phase contract:
///
/// - `execute` performs the forward effect
/// - `undo` reverses a previously successful `execute`, called in reverse
///   order during rollback
/// - `clean` releases undo resources after the transaction commits
/// - `redundant` reports whether a later action on the same resource makes
///   this one's effect moot
///
/// Destructive kinds never delete immediately: `RemoveFile` and
/// `RemoveDirAll` rename their target aside to a recoverable name, and only
/// `clean` deletes it for good.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Create or overwrite a file with the given bytes.
    WriteFile { path: PathBuf, bytes: Vec<u8> },
    /// Remove a file, staged through a rename.
    RemoveFile { path: PathBuf },
    /// Remove a directory tree, staged through a rename.
    RemoveDirAll { path: PathBuf },
    /// Create a directory (and any missing parents).
    CreateDir { path: PathBuf },
}

impl Action {
    /// The path this action mutates.
    pub fn target(&self) -> &Path {
        match self {
            Self::WriteFile { path, .. }
            | Self::RemoveFile { path }
            | Self::RemoveDirAll { path }
            | Self::CreateDir { path } => path,
        }
    }

    /// Perform the forward effect. Must leave no residue on failure: each
    /// arm either succeeds completely or changes nothing that `undo` of
    /// *earlier* actions cannot handle.
    pub fn execute(&self, ctx: &mut ActionContext) -> TxnResult<()> {
        match self {
            Self::WriteFile { path, bytes } => {
                ctx.backups.pending(path)?;
                if let Err(e) = fs::write(path, bytes) {
                    // Rollback during commit only covers earlier actions, so
                    // a failed write restores its own snapshot here: the
                    // target may already be truncated or partially written.
                    if let Err(restore) = ctx.backups.rollback(path) {
                        warn!(
                            path = %path.display(),
                            error = %restore,
                            "restore after failed write also failed"
                        );
                    }
                    return Err(e.into());
                }
                Ok(())
            }
            Self::RemoveFile { path } => {
                fs::rename(path, removed_path(path))?;
                Ok(())
            }
            Self::RemoveDirAll { path } => {
                fs::rename(path, removed_path(path))?;
                Ok(())
            }
            Self::CreateDir { path } => {
                if !path.exists() {
                    fs::create_dir_all(path)?;
                    ctx.created_dirs.insert(path.clone());
                }
                Ok(())
            }
        }
    }

    /// Reverse the effect of a previously successful `execute`.
    pub fn undo(&self, ctx: &mut ActionContext) -> TxnResult<()> {
        match self {
            Self::WriteFile { path, .. } => ctx.backups.rollback(path),
            Self::RemoveFile { path } | Self::RemoveDirAll { path } => {
                fs::rename(removed_path(path), path)?;
                Ok(())
            }
            Self::CreateDir { path } => {
                if ctx.created_dirs.remove(path) {
                    fs::remove_dir_all(path)?;
                }
                Ok(())
            }
        }
    }

    /// Release undo resources after commit: drop backups and perform the
    /// permanent delete of staged removals. Failures here are logged, not
    /// propagated — the commit already happened.
    pub fn clean(&self, ctx: &mut ActionContext) {
        match self {
            Self::WriteFile { path, .. } => ctx.backups.clean(path),
            Self::RemoveFile { path } => {
                let staged = removed_path(path);
                if let Err(e) = fs::remove_file(&staged) {
                    warn!(path = %staged.display(), error = %e, "failed to delete staged removal");
                }
            }
            Self::RemoveDirAll { path } => {
                let staged = removed_path(path);
                if let Err(e) = fs::remove_dir_all(&staged) {
                    warn!(path = %staged.display(), error = %e, "failed to delete staged removal");
                }
            }
            Self::CreateDir { .. } => {}
        }
    }

    /// Returns `true` if `later`, appearing after this action in the same
    /// pending transaction, makes this action's effect moot. Two full
    /// overwrites of the same path fold to the last one; everything else is
    /// kept, since skipping could change what `execute` observes.
    pub fn redundant(&self, later: &Action) -> bool {
        match (self, later) {
            (Self::WriteFile { path: a, .. }, Self::WriteFile { path: b, .. }) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_execute_undo_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.dat");
        fs::write(&path, b"old").unwrap();

        let mut ctx = ActionContext::new();
        let action = Action::WriteFile {
            path: path.clone(),
            bytes: b"new".to_vec(),
        };

        action.execute(&mut ctx).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");

        action.undo(&mut ctx).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"old");
    }

    // Writes to /dev/full fail with ENOSPC, which is exactly the failure
    // mode a half-written target leaves behind.
    #[cfg(target_os = "linux")]
    #[test]
    fn failing_write_restores_its_own_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.dat");
        fs::write(&path, b"old").unwrap();

        let mut ctx = ActionContext::new();
        // Snapshot first (first snapshot wins), then point the path at the
        // always-full device so the write itself fails.
        ctx.backups.pending(&path).unwrap();
        fs::remove_file(&path).unwrap();
        std::os::unix::fs::symlink("/dev/full", &path).unwrap();

        let action = Action::WriteFile {
            path: path.clone(),
            bytes: b"new".to_vec(),
        };
        assert!(action.execute(&mut ctx).is_err());

        // Original bytes back, backup gone, nothing left tracked.
        assert_eq!(fs::read(&path).unwrap(), b"old");
        assert!(!crate::backup::backup_path(&path).exists());
        assert!(ctx.backups.is_empty());
    }

    #[test]
    fn remove_file_is_staged_until_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doomed.dat");
        fs::write(&path, b"data").unwrap();

        let mut ctx = ActionContext::new();
        let action = Action::RemoveFile { path: path.clone() };

        action.execute(&mut ctx).unwrap();
        assert!(!path.exists());
        assert!(removed_path(&path).exists());

        action.clean(&mut ctx);
        assert!(!removed_path(&path).exists());
    }

    #[test]
    fn remove_file_undo_restores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doomed.dat");
        fs::write(&path, b"data").unwrap();

        let mut ctx = ActionContext::new();
        let action = Action::RemoveFile { path: path.clone() };
        action.execute(&mut ctx).unwrap();
        action.undo(&mut ctx).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }

    #[test]
    fn remove_dir_all_staged_rename() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("inner.dat"), b"x").unwrap();

        let mut ctx = ActionContext::new();
        let action = Action::RemoveDirAll { path: target.clone() };

        action.execute(&mut ctx).unwrap();
        assert!(!target.exists());

        action.undo(&mut ctx).unwrap();
        assert_eq!(fs::read(target.join("inner.dat")).unwrap(), b"x");
    }

    #[test]
    fn create_dir_undo_removes_only_if_created() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh");
        let existing = dir.path().join("existing");
        fs::create_dir(&existing).unwrap();

        let mut ctx = ActionContext::new();
        let create_fresh = Action::CreateDir { path: fresh.clone() };
        let create_existing = Action::CreateDir { path: existing.clone() };

        create_fresh.execute(&mut ctx).unwrap();
        create_existing.execute(&mut ctx).unwrap();

        create_fresh.undo(&mut ctx).unwrap();
        create_existing.undo(&mut ctx).unwrap();
        assert!(!fresh.exists());
        assert!(existing.exists());
    }

    #[test]
    fn remove_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ActionContext::new();
        let action = Action::RemoveFile {
            path: dir.path().join("nope.dat"),
        };
        assert!(action.execute(&mut ctx).is_err());
    }

    #[test]
    fn successive_writes_are_redundant() {
        let a = Action::WriteFile {
            path: PathBuf::from("/x/data"),
            bytes: b"first".to_vec(),
        };
        let b = Action::WriteFile {
            path: PathBuf::from("/x/data"),
            bytes: b"second".to_vec(),
        };
        assert!(a.redundant(&b));
    }

    #[test]
    fn writes_to_different_paths_are_not_redundant() {
        let a = Action::WriteFile {
            path: PathBuf::from("/x/one"),
            bytes: vec![],
        };
        let b = Action::WriteFile {
            path: PathBuf::from("/x/two"),
            bytes: vec![],
        };
        assert!(!a.redundant(&b));
    }

    #[test]
    fn write_is_not_redundant_against_remove() {
        let write = Action::WriteFile {
            path: PathBuf::from("/x/data"),
            bytes: vec![],
        };
        let remove = Action::RemoveFile {
            path: PathBuf::from("/x/data"),
        };
        // The remove's execute renames the file the write created; skipping
        // the write would make it fail.
        assert!(!write.redundant(&remove));
    }
}
