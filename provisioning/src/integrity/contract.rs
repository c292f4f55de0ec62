//! Root integrity contracts and where they come from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wildmatch::WildMatchPattern;

use crate::error::{ProvisioningError, Result};

type ExtraPattern = WildMatchPattern<'*', '?'>;

/// Expected structure of one storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootIntegrityContract {
    pub provider_key: String,
    pub root_key: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub required_folders: Vec<String>,
    #[serde(default)]
    pub optional_folders: Vec<String>,
    /// Glob patterns (`*`, `?`), matched case-insensitively.
    #[serde(default)]
    pub allowed_extras: Vec<String>,
    /// Exact names, matched case-insensitively.
    #[serde(default)]
    pub allowed_root_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine_relpath: Option<String>,
    pub max_items: u64,
    pub max_bytes: u64,
}

fn default_version() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl RootIntegrityContract {
    pub fn new(provider_key: impl Into<String>, root_key: impl Into<String>) -> Self {
        Self {
            provider_key: provider_key.into(),
            root_key: root_key.into(),
            version: default_version(),
            active: default_active(),
            required_folders: Vec::new(),
            optional_folders: Vec::new(),
            allowed_extras: Vec::new(),
            allowed_root_files: Vec::new(),
            quarantine_relpath: None,
            max_items: 10_000,
            max_bytes: 5 * 1024 * 1024 * 1024,
        }
    }

    /// Folder names that are never flagged, besides extras.
    pub fn is_declared_folder(&self, name: &str) -> bool {
        self.required_folders.iter().any(|f| f == name)
            || self.optional_folders.iter().any(|f| f == name)
    }
}

/// Compiled allow-lists for one run (contract plus request overrides).
#[derive(Debug)]
pub struct AllowList {
    extras: Vec<ExtraPattern>,
    root_files: Vec<String>,
}

impl AllowList {
    pub fn new<'a>(
        extras: impl IntoIterator<Item = &'a String>,
        root_files: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        Self {
            extras: extras
                .into_iter()
                .map(|p| ExtraPattern::new_case_insensitive(p))
                .collect(),
            root_files: root_files.into_iter().map(|f| f.to_lowercase()).collect(),
        }
    }

    pub fn is_allowed_extra(&self, name: &str) -> bool {
        self.extras.iter().any(|p| p.matches(name))
    }

    pub fn is_allowed_root_file(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.root_files.iter().any(|f| *f == lowered)
    }
}

/// Source of contracts, keyed by `(provider_key, root_key)`.
///
/// Implementations are read on every call; callers must not cache results
/// across runs.
pub trait ContractStore {
    fn active_contract(
        &self,
        provider_key: &str,
        root_key: &str,
    ) -> Result<Option<RootIntegrityContract>>;
}

/// The active row with the highest version for the key.
fn select_active<'a>(
    rows: impl IntoIterator<Item = &'a RootIntegrityContract>,
    provider_key: &str,
    root_key: &str,
) -> Option<RootIntegrityContract> {
    rows.into_iter()
        .filter(|c| c.active && c.provider_key == provider_key && c.root_key == root_key)
        .max_by_key(|c| c.version)
        .cloned()
}

/// Load the active contract or fail with `MissingContract`.
pub fn load_contract(
    store: &dyn ContractStore,
    provider_key: &str,
    root_key: &str,
) -> Result<RootIntegrityContract> {
    store
        .active_contract(provider_key, root_key)?
        .ok_or_else(|| ProvisioningError::MissingContract {
            provider_key: provider_key.to_string(),
            root_key: root_key.to_string(),
        })
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryContractStore {
    rows: Vec<RootIntegrityContract>,
}

impl InMemoryContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, contract: RootIntegrityContract) -> Self {
        self.rows.push(contract);
        self
    }
}

impl ContractStore for InMemoryContractStore {
    fn active_contract(
        &self,
        provider_key: &str,
        root_key: &str,
    ) -> Result<Option<RootIntegrityContract>> {
        Ok(select_active(&self.rows, provider_key, root_key))
    }
}

/// Contract rows stored as a JSON array in one file.
#[derive(Debug, Clone)]
pub struct JsonContractStore {
    path: PathBuf,
}

impl JsonContractStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContractStore for JsonContractStore {
    fn active_contract(
        &self,
        provider_key: &str,
        root_key: &str,
    ) -> Result<Option<RootIntegrityContract>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| ProvisioningError::FileRead {
            path: self.path.clone(),
            source: e,
        })?;
        let rows: Vec<RootIntegrityContract> =
            serde_json::from_str(&content).map_err(|e| ProvisioningError::JsonDeserialize {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(select_active(&rows, provider_key, root_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn contract(version: u32, active: bool) -> RootIntegrityContract {
        RootIntegrityContract {
            version,
            active,
            ..RootIntegrityContract::new("dropbox", "domain_root")
        }
    }

    #[test]
    fn test_highest_active_version_wins() {
        let store = InMemoryContractStore::new()
            .with(contract(1, true))
            .with(contract(3, false))
            .with(contract(2, true));
        let found = load_contract(&store, "dropbox", "domain_root").expect("contract");
        assert_eq!(found.version, 2);
        assert!(matches!(
            load_contract(&store, "nas", "domain_root"),
            Err(ProvisioningError::MissingContract { .. })
        ));
    }

    #[test]
    fn test_json_store_reads_fresh() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("contracts.json");
        let store = JsonContractStore::new(&path);

        std::fs::write(&path, serde_json::to_string(&vec![contract(1, true)]).expect("json"))
            .expect("write");
        assert_eq!(load_contract(&store, "dropbox", "domain_root").expect("v1").version, 1);

        std::fs::write(
            &path,
            serde_json::to_string(&vec![contract(1, false), contract(4, true)]).expect("json"),
        )
        .expect("write");
        assert_eq!(load_contract(&store, "dropbox", "domain_root").expect("v4").version, 4);
    }

    #[test]
    fn test_allow_list_matching() {
        let extras = vec!["Temp*".to_string(), "?_Scratch".to_string()];
        let files = vec!["desktop.ini".to_string()];
        let allow = AllowList::new(&extras, &files);
        assert!(allow.is_allowed_extra("temporary"));
        assert!(allow.is_allowed_extra("A_scratch"));
        assert!(!allow.is_allowed_extra("AB_Scratch"));
        assert!(allow.is_allowed_root_file("Desktop.INI"));
        assert!(!allow.is_allowed_root_file("notes.txt"));
    }
}
