//! Traversal-safe path helpers shared by the provisioning engine.
//!
//! Every name that ends up on disk (template node names after token
//! expansion, seed references, quarantine locations, registration relpaths)
//! passes through this crate first. All checks are lexical: nothing here
//! touches the filesystem, so the same answer comes back whether or not the
//! path exists yet.

use std::path::{Component, Path, PathBuf};

use path_clean::PathClean;

/// Characters that are never allowed inside a single path segment.
///
/// The set is the union of what Windows, macOS and the cloud-sync clients
/// reject, so a tree that validates here can be mirrored to any backend.
pub const DISALLOWED_SEGMENT_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reasons a segment or relative path is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathSafetyError {
    #[error("path segment is empty")]
    EmptySegment,

    #[error("relative path is empty")]
    EmptyPath,

    #[error("traversal segment '{0}' is not allowed")]
    Traversal(String),

    #[error("absolute path '{0}' is not allowed where a relative path is expected")]
    Absolute(String),

    #[error("segment '{segment}' contains disallowed character {ch:?}")]
    DisallowedCharacter { segment: String, ch: char },

    #[error("segment '{0}' is a reserved device name")]
    ReservedName(String),

    #[error("segment '{0}' has leading or trailing whitespace or a trailing dot")]
    UnsafeEdge(String),
}

/// Validate a single directory or file name.
pub fn validate_segment(segment: &str) -> Result<(), PathSafetyError> {
    if segment.is_empty() {
        return Err(PathSafetyError::EmptySegment);
    }
    if segment == "." || segment == ".." {
        return Err(PathSafetyError::Traversal(segment.to_string()));
    }
    if let Some(ch) = segment
        .chars()
        .find(|c| DISALLOWED_SEGMENT_CHARS.contains(c) || c.is_control())
    {
        return Err(PathSafetyError::DisallowedCharacter {
            segment: segment.to_string(),
            ch,
        });
    }
    if segment.trim() != segment || segment.ends_with('.') {
        return Err(PathSafetyError::UnsafeEdge(segment.to_string()));
    }
    let stem = segment.split('.').next().unwrap_or(segment);
    if RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        return Err(PathSafetyError::ReservedName(segment.to_string()));
    }
    Ok(())
}

/// Validate a relative path written with `/` or `\` separators and return
/// its segments.
///
/// Rejects absolute paths (leading separator or a drive prefix such as
/// `C:`), empty segments (`a//b`) and any traversal segment.
pub fn validate_relative_path(relpath: &str) -> Result<Vec<&str>, PathSafetyError> {
    let trimmed = relpath.trim();
    if trimmed.is_empty() {
        return Err(PathSafetyError::EmptyPath);
    }
    if trimmed.starts_with('/') || trimmed.starts_with('\\') || has_drive_prefix(trimmed) {
        return Err(PathSafetyError::Absolute(relpath.to_string()));
    }
    let segments: Vec<&str> = trimmed.split(['/', '\\']).collect();
    for segment in &segments {
        validate_segment(segment)?;
    }
    Ok(segments)
}

/// Join a validated relative path onto `base`.
pub fn join_relative(base: &Path, relpath: &str) -> Result<PathBuf, PathSafetyError> {
    let segments = validate_relative_path(relpath)?;
    let mut joined = base.to_path_buf();
    for segment in segments {
        joined.push(segment);
    }
    Ok(joined)
}

/// Lexically normalise a path (collapse `.` and `..`, drop duplicate
/// separators). Does not resolve symlinks.
pub fn normalize(path: &Path) -> PathBuf {
    path.clean()
}

/// True when `target` is `root` or lies underneath it.
///
/// Comparison is component-wise, so `/data/p10` is *not* within `/data/p1`.
pub fn is_within(root: &Path, target: &Path) -> bool {
    normalize(target).starts_with(normalize(root))
}

/// True when `target` lies underneath `root` and is not `root` itself.
pub fn is_strictly_within(root: &Path, target: &Path) -> bool {
    let root = normalize(root);
    let target = normalize(target);
    target != root && target.starts_with(&root)
}

/// Compute the `/`-separated path of `target` relative to `root`.
///
/// Returns `None` when either path is not absolute, when `target` is outside
/// `root`, when the two are the same directory, or when any resulting
/// segment fails [`validate_segment`].
pub fn try_build_folder_relpath(root: &Path, target: &Path) -> Option<String> {
    if !root.is_absolute() || !target.is_absolute() {
        return None;
    }
    let root = normalize(root);
    let target = normalize(target);
    let relative = target.strip_prefix(&root).ok()?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str()?;
                validate_segment(part).ok()?;
                segments.push(part);
            }
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn has_drive_prefix(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
