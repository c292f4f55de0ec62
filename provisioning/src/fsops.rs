//! Filesystem moves and copies that tolerate synced and network roots.
//!
//! Renames are never assumed to be atomic across roots: a move that crosses
//! devices falls back to copy + delete. Nothing here overwrites an existing
//! destination.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use mgf_utils_path_safety::normalize;

use crate::error::{ProvisioningError, Result};
use crate::retry::{RetryConfig, RetryError, execute_with_backoff_sync};

/// True for symlinks, and for junctions and other reparse points on Windows.
pub fn is_reparse_point(path: &Path) -> bool {
    let Ok(metadata) = std::fs::symlink_metadata(path) else {
        return false;
    };
    if metadata.file_type().is_symlink() {
        return true;
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
        if metadata.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
            return true;
        }
    }
    false
}

/// First path strictly below `root` on the way to `target` that is a
/// reparse point, if any. `root` itself is not checked.
pub fn reparse_point_below(root: &Path, target: &Path) -> Option<PathBuf> {
    let root = normalize(root);
    let target = normalize(target);
    let relative = target.strip_prefix(&root).ok()?;
    let mut current = root.clone();
    for component in relative.components() {
        current.push(component);
        if is_reparse_point(&current) {
            return Some(current);
        }
    }
    None
}

/// Move a directory (or file) to `to`, retrying transient lock errors.
///
/// Fails with `DestinationExists` when `to` is already present and with a
/// `Move` error wrapping `NotFound` when `from` is gone.
pub fn move_path(from: &Path, to: &Path, retry: &RetryConfig) -> Result<()> {
    if to.exists() {
        return Err(ProvisioningError::DestinationExists(to.to_path_buf()));
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ProvisioningError::DirectoryCreate {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let mut last: Option<ProvisioningError> = None;
    let outcome = execute_with_backoff_sync(
        || {
            let attempt = rename_or_copy(from, to);
            if let Err(e) = &attempt {
                last = Some(clone_error(e, from, to));
            }
            attempt
        },
        retry,
    );
    match outcome {
        Ok(()) => {
            tracing::debug!(from = %from.display(), to = %to.display(), "Moved");
            Ok(())
        }
        Err(RetryError::MaxAttemptsExceeded { .. }) | Err(RetryError::PermanentError(_)) => {
            Err(last.unwrap_or_else(|| ProvisioningError::Move {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source: std::io::Error::other("move failed"),
            }))
        }
    }
}

fn rename_or_copy(from: &Path, to: &Path) -> Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            tracing::debug!(from = %from.display(), "Rename crosses devices, copying");
            if from.is_file() {
                std::fs::copy(from, to).map_err(|e| ProvisioningError::Copy {
                    from: from.to_path_buf(),
                    to: to.to_path_buf(),
                    source: e,
                })?;
                return std::fs::remove_file(from).map_err(|e| ProvisioningError::Move {
                    from: from.to_path_buf(),
                    to: to.to_path_buf(),
                    source: e,
                });
            }
            copy_then_remove_dir(from, to)
        }
        Err(e) => Err(ProvisioningError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: e,
        }),
    }
}

/// Copy a directory tree to `to`, then delete `from`.
///
/// Anything the copy could not carry over (failed files, skipped links)
/// fails the move, removes the partial copy and leaves `from` intact.
fn copy_then_remove_dir(from: &Path, to: &Path) -> Result<()> {
    let report = copy_tree(from, to)?;
    let problem = report
        .failures
        .first()
        .map(|failure| failure.reason.clone())
        .or_else(|| {
            report
                .skipped_links
                .first()
                .map(|link| format!("link {} cannot be moved across devices", link.display()))
        });
    if let Some(reason) = problem {
        if let Err(e) = std::fs::remove_dir_all(to) {
            tracing::warn!(to = %to.display(), "Failed to remove partial copy: {e}");
        }
        return Err(ProvisioningError::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: std::io::Error::other(reason),
        });
    }
    std::fs::remove_dir_all(from).map_err(|e| ProvisioningError::DirectoryRemove {
        path: from.to_path_buf(),
        source: e,
    })
}

/// Rebuild an equivalent error so the last attempt's cause survives the
/// retry loop, which only keeps its message.
fn clone_error(err: &ProvisioningError, from: &Path, to: &Path) -> ProvisioningError {
    let rebuild = |source: &std::io::Error| std::io::Error::new(source.kind(), source.to_string());
    match err {
        ProvisioningError::Move { from, to, source } => ProvisioningError::Move {
            from: from.clone(),
            to: to.clone(),
            source: rebuild(source),
        },
        ProvisioningError::Copy { from, to, source } => ProvisioningError::Copy {
            from: from.clone(),
            to: to.clone(),
            source: rebuild(source),
        },
        ProvisioningError::DirectoryRemove { path, source } => ProvisioningError::DirectoryRemove {
            path: path.clone(),
            source: rebuild(source),
        },
        ProvisioningError::DirectoryCreate { path, source } => ProvisioningError::DirectoryCreate {
            path: path.clone(),
            source: rebuild(source),
        },
        other => ProvisioningError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: std::io::Error::other(other.to_string()),
        },
    }
}

/// A file that could not be copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of [`copy_tree`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyReport {
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub skipped_links: Vec<PathBuf>,
    pub failures: Vec<CopyFailure>,
}

impl CopyReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Recursively copy `from` into `to` (created if needed).
///
/// Existing destination files are left untouched. Symlinks are recorded and
/// skipped. Per-entry failures are collected; only an unreadable source
/// root is an error.
pub fn copy_tree(from: &Path, to: &Path) -> Result<CopyReport> {
    if !from.is_dir() {
        return Err(ProvisioningError::DirectoryRead {
            path: from.to_path_buf(),
            source: std::io::Error::new(ErrorKind::NotFound, "source directory not found"),
        });
    }
    std::fs::create_dir_all(to).map_err(|e| ProvisioningError::DirectoryCreate {
        path: to.to_path_buf(),
        source: e,
    })?;

    let mut report = CopyReport::default();
    let walker = WalkDir::new(from).min_depth(1).follow_links(false);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.failures.push(CopyFailure {
                    path: e.path().map(Path::to_path_buf).unwrap_or_else(|| from.to_path_buf()),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let destination = to.join(relative);

        if entry.path_is_symlink() || is_reparse_point(entry.path()) {
            report.skipped_links.push(entry.path().to_path_buf());
            continue;
        }
        if entry.file_type().is_dir() {
            if let Err(e) = std::fs::create_dir_all(&destination) {
                report.failures.push(CopyFailure {
                    path: entry.path().to_path_buf(),
                    reason: e.to_string(),
                });
            }
            continue;
        }
        if destination.exists() {
            continue;
        }
        match std::fs::copy(entry.path(), &destination) {
            Ok(bytes) => {
                report.files_copied += 1;
                report.bytes_copied += bytes;
            }
            Err(e) => report.failures.push(CopyFailure {
                path: entry.path().to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    tracing::debug!(
        from = %from.display(),
        to = %to.display(),
        files = report.files_copied,
        failures = report.failures.len(),
        "Tree copied"
    );
    Ok(report)
}
