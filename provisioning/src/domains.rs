//! Storage domain definitions and root resolution.
//!
//! A domain is one storage backend with its own root and templates:
//! `dropbox` (cloud-sync), `lucidlink` (high-speed production) and `nas`
//! (archival). Definitions are static; only the root paths come from
//! configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use mgf_utils_path_safety::{is_within, try_build_folder_relpath};

use crate::config::EngineConfig;

/// Isolated subtree of every root used by test-mode runs.
pub const TEST_RUNS_DIR: &str = "99_TestRuns";

/// `rootKey` of a registration for a real project container.
pub const ROOT_KEY_PROJECT: &str = "project_container";

/// `rootKey` of a registration for a test-run project container.
pub const ROOT_KEY_TEST_PROJECT: &str = "test_project_container";

/// Configured storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DomainKey {
    #[serde(rename = "dropbox")]
    Dropbox,
    #[serde(rename = "lucidlink")]
    LucidLink,
    #[serde(rename = "nas")]
    Nas,
}

/// What a domain is used for in the project lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainRole {
    CloudSync,
    Production,
    Archival,
}

impl DomainKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainKey::Dropbox => "dropbox",
            DomainKey::LucidLink => "lucidlink",
            DomainKey::Nas => "nas",
        }
    }

    pub fn role(&self) -> DomainRole {
        match self {
            DomainKey::Dropbox => DomainRole::CloudSync,
            DomainKey::LucidLink => DomainRole::Production,
            DomainKey::Nas => DomainRole::Archival,
        }
    }

    /// All domains in processing order
    pub fn all() -> [Self; 3] {
        [DomainKey::Dropbox, DomainKey::LucidLink, DomainKey::Nas]
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dropbox" => Ok(DomainKey::Dropbox),
            "lucidlink" | "lucid_link" => Ok(DomainKey::LucidLink),
            "nas" => Ok(DomainKey::Nas),
            other => Err(format!("unknown domain key '{other}'")),
        }
    }
}

/// Static description of one storage domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDefinition {
    pub key: DomainKey,
    pub storage_provider_key: String,
    /// Template describing the structure of the domain root.
    pub root_template: PathBuf,
    /// Template for one project container inside this domain.
    pub project_template: PathBuf,
    /// Subfolder of the root where project containers live.
    pub projects_subfolder: String,
    /// Cloud-sync only: staging folder for projects on their way out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_archive_subfolder: Option<String>,
    /// Cloud-sync only: final resting place of archived projects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_subfolder: Option<String>,
}

impl DomainDefinition {
    /// The three standard domains, with templates under `templates_dir`.
    pub fn standard(templates_dir: &Path) -> Vec<DomainDefinition> {
        vec![
            DomainDefinition {
                key: DomainKey::Dropbox,
                storage_provider_key: "dropbox".to_string(),
                root_template: templates_dir.join("dropbox_root.json"),
                project_template: templates_dir.join("dropbox_project.json"),
                projects_subfolder: "01_Projects_Active".to_string(),
                to_archive_subfolder: Some("02_Projects_ToArchive".to_string()),
                archived_subfolder: Some("03_Projects_Archived".to_string()),
            },
            DomainDefinition {
                key: DomainKey::LucidLink,
                storage_provider_key: "lucidlink".to_string(),
                root_template: templates_dir.join("lucidlink_root.json"),
                project_template: templates_dir.join("lucidlink_project.json"),
                projects_subfolder: "01_Projects_Active".to_string(),
                to_archive_subfolder: None,
                archived_subfolder: None,
            },
            DomainDefinition {
                key: DomainKey::Nas,
                storage_provider_key: "nas".to_string(),
                root_template: templates_dir.join("nas_root.json"),
                project_template: templates_dir.join("nas_archive_project.json"),
                projects_subfolder: "01_Projects_Archive".to_string(),
                to_archive_subfolder: None,
                archived_subfolder: None,
            },
        ]
    }

    /// Base directory under which containers are created: the projects
    /// subfolder, or its mirror inside [`TEST_RUNS_DIR`] for test runs.
    pub fn container_base(&self, root: &Path, test_mode: bool) -> PathBuf {
        self.mode_base(root, test_mode).join(&self.projects_subfolder)
    }

    /// Root itself, or the isolated test subtree of it.
    pub fn mode_base(&self, root: &Path, test_mode: bool) -> PathBuf {
        if test_mode {
            root.join(TEST_RUNS_DIR)
        } else {
            root.to_path_buf()
        }
    }
}

/// Registration record the caller persists for a provisioned container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRootRegistration {
    pub domain_key: DomainKey,
    pub storage_provider_key: String,
    pub root_key: String,
    pub folder_relpath: String,
}

impl StorageRootRegistration {
    /// Build a registration for `container` under `root`.
    ///
    /// Returns `None` when the relative path would be empty, absolute, or
    /// contain traversal segments.
    pub fn derive(
        definition: &DomainDefinition,
        root: &Path,
        container: &Path,
        test_mode: bool,
    ) -> Option<Self> {
        let folder_relpath = try_build_folder_relpath(root, container)?;
        Some(Self {
            domain_key: definition.key,
            storage_provider_key: definition.storage_provider_key.clone(),
            root_key: if test_mode {
                ROOT_KEY_TEST_PROJECT
            } else {
                ROOT_KEY_PROJECT
            }
            .to_string(),
            folder_relpath,
        })
    }
}

/// Outcome of resolving a domain's root path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootResolution {
    /// No path configured and no sandbox to fall back to.
    Unconfigured,
    /// Sandboxing is forced but the path escapes the sandbox directory, or
    /// the sandbox directory itself is not absolute.
    OutsideSandbox(PathBuf),
    Resolved(PathBuf),
}

/// Resolves root paths from configuration, honouring sandbox rules.
#[derive(Debug, Clone, Copy)]
pub struct RootResolver<'a> {
    config: &'a EngineConfig,
    force_sandbox: bool,
}

impl<'a> RootResolver<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            force_sandbox: config.sandbox.force,
        }
    }

    /// Force sandboxing for this run even if configuration does not.
    pub fn with_forced_sandbox(mut self, force: bool) -> Self {
        self.force_sandbox = self.force_sandbox || force;
        self
    }

    /// Default sandbox location for a domain.
    pub fn sandbox_root(&self, key: DomainKey) -> PathBuf {
        self.config
            .sandbox
            .runtime_dir
            .join("sandbox")
            .join(key.as_str())
    }

    pub fn resolve(&self, key: DomainKey) -> RootResolution {
        let configured = self.config.roots.get(key).map(Path::to_path_buf);
        if !self.force_sandbox {
            return match configured {
                Some(path) => RootResolution::Resolved(path),
                None => RootResolution::Unconfigured,
            };
        }

        let runtime_dir = &self.config.sandbox.runtime_dir;
        let path = configured.unwrap_or_else(|| self.sandbox_root(key));
        if runtime_dir.is_absolute() && path.is_absolute() && is_within(runtime_dir, &path) {
            RootResolution::Resolved(path)
        } else {
            RootResolution::OutsideSandbox(path)
        }
    }
}
