//! Provisioning manifest: the persisted audit record of one execution.
//!
//! Written atomically (temp file + fsync + rename) to
//! `<target>/00_Admin/.mgf/manifest/folder_manifest.json` and always
//! overwritten. Reads return a deterministic error for missing or corrupted
//! files.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::{ExecutionMode, ExecutionResult};
use crate::template::{FolderPlan, LoadedTemplate, ProvisioningTokens};

pub const MANIFEST_FILENAME: &str = "folder_manifest.json";

/// Current manifest schema version.
pub const SCHEMA_VERSION: &str = "folder_manifest@1";

/// Manifest directory relative to the target root.
pub const MANIFEST_RELDIR: [&str; 3] = ["00_Admin", ".mgf", "manifest"];

/// Errors from manifest I/O.
#[derive(Debug, thiserror::Error)]
pub enum ManifestIoError {
    #[error("Manifest not found at {path}")]
    NotFound { path: PathBuf },

    #[error("Manifest corrupted at {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTemplate {
    pub id: String,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSnapshot {
    pub project_code: Option<String>,
    pub project_name: Option<String>,
    pub client_name: Option<String>,
    pub editor_initials: Vec<String>,
}

impl From<&ProvisioningTokens> for TokenSnapshot {
    fn from(tokens: &ProvisioningTokens) -> Self {
        Self {
            project_code: tokens.project_code().map(str::to_string),
            project_name: tokens.project_name().map(str::to_string),
            client_name: tokens.client_name().map(str::to_string),
            editor_initials: tokens.editor_initials().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningManifest {
    pub schema_version: String,
    pub template: ManifestTemplate,
    pub mode: ExecutionMode,
    pub generated_at: DateTime<Utc>,
    pub tokens: TokenSnapshot,
    pub target_root: PathBuf,
    pub expected_items: Vec<String>,
    pub created_items: Vec<String>,
    pub missing_required: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ProvisioningManifest {
    pub fn new(
        loaded: &LoadedTemplate,
        plan: &FolderPlan,
        tokens: &ProvisioningTokens,
        mode: ExecutionMode,
        result: &ExecutionResult,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            template: ManifestTemplate {
                id: loaded.template_id.clone(),
                path: loaded.template_path.clone(),
                sha256: loaded.content_hash.clone(),
            },
            mode,
            generated_at: Utc::now(),
            tokens: TokenSnapshot::from(tokens),
            target_root: plan.target_root.clone(),
            expected_items: plan.items.iter().map(|i| i.relative_path.clone()).collect(),
            created_items: result.created_items.clone(),
            missing_required: result.missing_required.clone(),
            warnings: result.warnings.clone(),
            errors: result.errors.clone(),
        }
    }
}

pub fn manifest_path(target_root: &Path) -> PathBuf {
    let mut path = target_root.to_path_buf();
    for segment in MANIFEST_RELDIR {
        path.push(segment);
    }
    path.join(MANIFEST_FILENAME)
}

/// Read the manifest stored under `target_root`.
pub fn read_manifest(target_root: &Path) -> Result<ProvisioningManifest, ManifestIoError> {
    let path = manifest_path(target_root);
    if !path.exists() {
        return Err(ManifestIoError::NotFound { path });
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ManifestIoError::Io {
        path: path.clone(),
        source: e,
    })?;

    let manifest: ProvisioningManifest =
        serde_json::from_str(&content).map_err(|e| ManifestIoError::Corrupted {
            path: path.clone(),
            reason: e.to_string(),
        })?;

    if !manifest.schema_version.starts_with("folder_manifest@") {
        return Err(ManifestIoError::VersionMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: manifest.schema_version,
        });
    }

    Ok(manifest)
}

/// Write `manifest` under its target root, replacing any previous one.
///
/// Returns the manifest path.
pub fn write_manifest(manifest: &ProvisioningManifest) -> Result<PathBuf, ManifestIoError> {
    let target = manifest_path(&manifest.target_root);
    let dir = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| manifest.target_root.clone());

    std::fs::create_dir_all(&dir).map_err(|e| ManifestIoError::Io {
        path: dir.clone(),
        source: e,
    })?;

    let temp_path = dir.join(format!(".{MANIFEST_FILENAME}.tmp"));
    let json = serde_json::to_string_pretty(manifest)?;

    let mut file = std::fs::File::create(&temp_path).map_err(|e| ManifestIoError::Io {
        path: temp_path.clone(),
        source: e,
    })?;
    file.write_all(json.as_bytes())
        .map_err(|e| ManifestIoError::Io {
            path: temp_path.clone(),
            source: e,
        })?;
    file.sync_all().map_err(|e| ManifestIoError::Io {
        path: temp_path.clone(),
        source: e,
    })?;

    std::fs::rename(&temp_path, &target).map_err(|e| ManifestIoError::Io {
        path: target.clone(),
        source: e,
    })?;

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{FolderNode, FolderTemplate, plan};
    use tempfile::TempDir;

    fn sample(dir: &Path) -> ProvisioningManifest {
        let tokens = ProvisioningTokens::new()
            .with_project_code("MGF25-0007")
            .with_editor_initials(["AB"]);
        let template = FolderTemplate::new(
            FolderNode::folder("{PROJECT_CODE}")
                .with_children(vec![FolderNode::folder("00_Admin")]),
        );
        let plan = plan(&template, &tokens, dir).expect("plan");
        let loaded = LoadedTemplate {
            template,
            template_id: "demo".to_string(),
            template_path: dir.join("demo.json"),
            seeds_dir: dir.join("seeds"),
            schema_path: dir.join("schema.json"),
            content_hash: "ab".repeat(32),
        };
        let result = ExecutionResult {
            created_items: vec!["00_Admin".to_string()],
            ..ExecutionResult::default()
        };
        ProvisioningManifest::new(&loaded, &plan, &tokens, ExecutionMode::Apply, &result)
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().expect("tempdir");
        let manifest = sample(dir.path());
        let path = write_manifest(&manifest).expect("write");
        assert!(path.ends_with("00_Admin/.mgf/manifest/folder_manifest.json"));
        assert!(!path.with_file_name(".folder_manifest.json.tmp").exists());

        let read = read_manifest(&manifest.target_root).expect("read");
        assert_eq!(read, manifest);
        assert_eq!(read.tokens.editor_initials, vec!["AB"]);
        assert_eq!(read.expected_items, vec!["00_Admin"]);
    }

    #[test]
    fn test_overwrites_previous() {
        let dir = TempDir::new().expect("tempdir");
        let mut manifest = sample(dir.path());
        write_manifest(&manifest).expect("first");
        manifest.mode = ExecutionMode::Repair;
        manifest.created_items.clear();
        write_manifest(&manifest).expect("second");
        let read = read_manifest(&manifest.target_root).expect("read");
        assert_eq!(read.mode, ExecutionMode::Repair);
        assert!(read.created_items.is_empty());
    }

    #[test]
    fn test_missing_and_corrupted() {
        let dir = TempDir::new().expect("tempdir");
        assert!(matches!(
            read_manifest(dir.path()),
            Err(ManifestIoError::NotFound { .. })
        ));
        let path = manifest_path(dir.path());
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "{not json").expect("write");
        assert!(matches!(
            read_manifest(dir.path()),
            Err(ManifestIoError::Corrupted { .. })
        ));
    }
}
