//! Guarded deletion of stale test-run artifacts.
//!
//! A directory is only removed when it lies strictly inside the domain root
//! with no linked folder on the way down, sits under the test-runs subtree,
//! and the caller set the cleanup flag. Any violation is refused before the
//! filesystem is touched.

use std::path::Path;

use serde::{Deserialize, Serialize};

use mgf_utils_path_safety::{is_strictly_within, normalize};

use crate::domains::TEST_RUNS_DIR;
use crate::error::ProvisioningError;
use crate::fsops::reparse_point_below;
use crate::retry::{RetryConfig, RetryError, execute_with_backoff_sync};

/// Result of one guarded cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CleanupOutcome {
    /// Nothing to delete.
    NotNeeded,
    Deleted,
    /// Refused by the guard; nothing was touched.
    Blocked { reason: String },
    /// Retries exhausted while the directory stayed locked.
    Locked { attempts: usize, last_error: String },
    /// Deletion failed for a non-transient reason.
    Failed { error: String },
}

/// Deletes a directory tree once the guard has allowed it.
pub trait TreeRemover {
    fn remove_tree(&self, path: &Path) -> std::io::Result<()>;
}

/// Removes trees from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsTreeRemover;

impl TreeRemover for FsTreeRemover {
    fn remove_tree(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_dir_all(path)
    }
}

/// Check the three guard conditions. `Err` carries the refusal reason.
pub fn check_guard(root: &Path, target: &Path, allow_cleanup: bool) -> Result<(), String> {
    if !is_strictly_within(root, target) {
        return Err(format!(
            "{} is not inside root {}",
            target.display(),
            root.display()
        ));
    }
    let root = normalize(root);
    let target = normalize(target);
    let first_segment = target
        .strip_prefix(&root)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|c| c.as_os_str().to_string_lossy().into_owned());
    if first_segment.as_deref() != Some(TEST_RUNS_DIR) {
        return Err(format!(
            "{} is not under the {TEST_RUNS_DIR} subtree",
            target.display()
        ));
    }
    if !allow_cleanup {
        return Err("test cleanup is not enabled for this run".to_string());
    }
    if let Some(link) = reparse_point_below(&root, &target) {
        return Err(format!(
            "{} is a link and may lead outside root {}",
            link.display(),
            root.display()
        ));
    }
    Ok(())
}

/// Delete `target` when it exists and the guard allows it.
pub fn cleanup_test_artifacts(
    root: &Path,
    target: &Path,
    allow_cleanup: bool,
    retry: &RetryConfig,
) -> CleanupOutcome {
    cleanup_test_artifacts_with(&FsTreeRemover, root, target, allow_cleanup, retry)
}

/// [`cleanup_test_artifacts`] with an explicit remover.
pub fn cleanup_test_artifacts_with(
    remover: &dyn TreeRemover,
    root: &Path,
    target: &Path,
    allow_cleanup: bool,
    retry: &RetryConfig,
) -> CleanupOutcome {
    if !target.exists() {
        return CleanupOutcome::NotNeeded;
    }
    if let Err(reason) = check_guard(root, target, allow_cleanup) {
        tracing::warn!(target = %target.display(), "Test cleanup blocked: {reason}");
        return CleanupOutcome::Blocked { reason };
    }

    let outcome = execute_with_backoff_sync(
        || {
            remover.remove_tree(target).map_err(|e| ProvisioningError::DirectoryRemove {
                path: target.to_path_buf(),
                source: e,
            })
        },
        retry,
    );
    match outcome {
        Ok(()) => {
            tracing::info!(target = %target.display(), "Removed stale test artifacts");
            CleanupOutcome::Deleted
        }
        Err(RetryError::MaxAttemptsExceeded {
            attempts,
            last_error,
        }) => {
            tracing::warn!(target = %target.display(), attempts, "Test cleanup still locked");
            CleanupOutcome::Locked {
                attempts,
                last_error,
            }
        }
        Err(RetryError::PermanentError(error)) => CleanupOutcome::Failed { error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_guard_conditions() {
        let root = Path::new("/data/dropbox");
        let ok = root.join("99_TestRuns/01_Projects_Active/P1");
        assert_eq!(check_guard(root, &ok, true), Ok(()));
        assert!(check_guard(root, &ok, false).is_err());
        assert!(check_guard(root, &root.join("01_Projects_Active/P1"), true).is_err());
        assert!(check_guard(root, Path::new("/data/dropbox2/99_TestRuns/P1"), true).is_err());
        assert!(check_guard(root, &root.join("99_TestRuns/../01_Projects_Active"), true).is_err());
        assert!(check_guard(root, root, true).is_err());
    }

    #[test]
    fn test_cleanup_deletes_allowed_target() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("99_TestRuns/01_Projects_Active/P1");
        std::fs::create_dir_all(target.join("00_Admin")).expect("mkdir");

        let outcome =
            cleanup_test_artifacts(dir.path(), &target, true, &RetryConfig::immediate(1));
        assert_eq!(outcome, CleanupOutcome::Deleted);
        assert!(!target.exists());
    }

    #[test]
    fn test_blocked_cleanup_touches_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("01_Projects_Active/P1");
        std::fs::create_dir_all(&target).expect("mkdir");

        let outcome =
            cleanup_test_artifacts(dir.path(), &target, true, &RetryConfig::immediate(1));
        assert!(matches!(outcome, CleanupOutcome::Blocked { .. }));
        assert!(target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_linked_test_runs_folder_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        let precious = outside.join("01_Projects_Active/P1/precious.txt");
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::create_dir_all(precious.parent().expect("parent")).expect("mkdir");
        std::fs::write(&precious, "keep").expect("write");
        std::os::unix::fs::symlink(&outside, root.join(TEST_RUNS_DIR)).expect("symlink");

        let target = root.join(TEST_RUNS_DIR).join("01_Projects_Active/P1");
        let outcome = cleanup_test_artifacts(&root, &target, true, &RetryConfig::immediate(1));
        assert!(matches!(outcome, CleanupOutcome::Blocked { .. }), "{outcome:?}");
        assert!(precious.exists());
    }

    struct BusyRemover {
        kind: std::io::ErrorKind,
        calls: std::cell::Cell<usize>,
    }

    impl TreeRemover for BusyRemover {
        fn remove_tree(&self, _path: &Path) -> std::io::Result<()> {
            self.calls.set(self.calls.get() + 1);
            Err(std::io::Error::new(self.kind, "held by sync client"))
        }
    }

    #[test]
    fn test_locked_and_failed_removal() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("99_TestRuns/P1");
        std::fs::create_dir_all(&target).expect("mkdir");

        let busy = BusyRemover {
            kind: std::io::ErrorKind::ResourceBusy,
            calls: std::cell::Cell::new(0),
        };
        let outcome = cleanup_test_artifacts_with(
            &busy,
            dir.path(),
            &target,
            true,
            &RetryConfig::immediate(2),
        );
        assert!(
            matches!(outcome, CleanupOutcome::Locked { attempts: 3, .. }),
            "{outcome:?}"
        );
        assert_eq!(busy.calls.get(), 3);

        let broken = BusyRemover {
            kind: std::io::ErrorKind::InvalidData,
            calls: std::cell::Cell::new(0),
        };
        let outcome = cleanup_test_artifacts_with(
            &broken,
            dir.path(),
            &target,
            true,
            &RetryConfig::immediate(2),
        );
        assert!(matches!(outcome, CleanupOutcome::Failed { .. }), "{outcome:?}");
        assert_eq!(broken.calls.get(), 1);
        assert!(target.exists());
    }

    #[test]
    fn test_missing_target_needs_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let outcome = cleanup_test_artifacts(
            dir.path(),
            &dir.path().join("99_TestRuns/gone"),
            false,
            &RetryConfig::immediate(1),
        );
        assert_eq!(outcome, CleanupOutcome::NotNeeded);
    }
}
