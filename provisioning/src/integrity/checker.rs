//! Scan a storage root against its contract and quarantine what does not
//! belong.
//!
//! Only the root's immediate entries are classified. Repair moves unknown
//! entries into a timestamped folder under the quarantine path, subject to
//! the contract's item and byte ceilings. Report mode and dry runs never
//! touch the filesystem.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use mgf_utils_path_safety::{is_strictly_within, join_relative, validate_relative_path};

use super::contract::{AllowList, RootIntegrityContract};
use super::measure::{MeasureLimits, Measurement, measure_dir, measure_file};
use crate::diagnostics::Diagnostics;
use crate::error::{ProvisioningError, Result};
use crate::fsops::{is_reparse_point, move_path, reparse_point_below};
use crate::retry::RetryConfig;

const COMPONENT: &str = "integrity";

/// Name format of the per-run quarantine folder.
pub const QUARANTINE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityMode {
    #[default]
    Report,
    Repair,
}

impl IntegrityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityMode::Report => "report",
            IntegrityMode::Repair => "repair",
        }
    }
}

impl fmt::Display for IntegrityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrityMode {
    type Err = ProvisioningError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" => Ok(IntegrityMode::Report),
            "repair" => Ok(IntegrityMode::Repair),
            other => Err(ProvisioningError::InvalidJobPayload(format!(
                "unknown integrity mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Folder,
    File,
}

/// Why an entry stays where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    ReparsePoint,
    TooLargeToQuarantine,
    SizeUnknown,
}

impl BlockedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedReason::ReparsePoint => "reparse_point",
            BlockedReason::TooLargeToQuarantine => "too_large_to_quarantine",
            BlockedReason::SizeUnknown => "size_unknown",
        }
    }
}

/// One unexpected top-level entry and its move plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootIntegrityEntry {
    pub name: String,
    pub kind: EntryKind,
    pub path: PathBuf,
    pub is_reparse_point: bool,
    /// `None` when not measured.
    pub size_bytes: Option<u64>,
    pub item_count: Option<u64>,
    pub blocked_reason: Option<BlockedReason>,
    pub will_move: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[serde(default)]
    pub moved: bool,
}

impl RootIntegrityEntry {
    fn new(name: String, kind: EntryKind, path: PathBuf) -> Self {
        Self {
            name,
            kind,
            path,
            is_reparse_point: false,
            size_bytes: None,
            item_count: None,
            blocked_reason: None,
            will_move: true,
            destination: None,
            moved: false,
        }
    }

    fn block(&mut self, reason: BlockedReason) {
        self.blocked_reason = Some(reason);
        self.will_move = false;
    }

    fn apply(&mut self, measurement: Measurement) {
        match measurement {
            Measurement::Within { items, bytes } => {
                self.item_count = Some(items);
                self.size_bytes = Some(bytes);
            }
            Measurement::TooLarge => self.block(BlockedReason::TooLargeToQuarantine),
            Measurement::Unknown(_) => self.block(BlockedReason::SizeUnknown),
        }
    }
}

/// Per-request adjustments to the contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntegrityOverrides {
    pub quarantine_relpath: Option<String>,
    pub max_items: Option<u64>,
    pub max_bytes: Option<u64>,
    /// Added to the contract's extras, not replacing them.
    pub allowed_extras: Vec<String>,
    pub allowed_root_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootIntegrityResult {
    pub provider_key: String,
    pub root_key: String,
    pub contract_version: u32,
    pub root_path: PathBuf,
    pub mode: IntegrityMode,
    pub dry_run: bool,
    pub limits: MeasureLimits,
    pub quarantine_path: Option<PathBuf>,
    pub unknown_folders: Vec<RootIntegrityEntry>,
    pub root_files: Vec<RootIntegrityEntry>,
    pub missing_required: Vec<String>,
    pub created_required: Vec<String>,
    pub moved_count: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl RootIntegrityResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.unknown_folders.is_empty()
            && self.root_files.is_empty()
            && self.missing_required.is_empty()
    }

    /// Every flagged entry, folders first.
    pub fn entries(&self) -> impl Iterator<Item = &RootIntegrityEntry> {
        self.unknown_folders.iter().chain(self.root_files.iter())
    }

    pub fn entry(&self, name: &str) -> Option<&RootIntegrityEntry> {
        self.entries().find(|e| e.name == name)
    }

    /// Whether this run may mutate the filesystem.
    pub fn mutates(&self) -> bool {
        self.mode == IntegrityMode::Repair && !self.dry_run
    }
}

/// Runs integrity scans with a fixed diagnostics sink and move retry policy.
pub struct RootIntegrityChecker<'a> {
    diagnostics: &'a dyn Diagnostics,
    retry: RetryConfig,
}

impl<'a> RootIntegrityChecker<'a> {
    pub fn new(diagnostics: &'a dyn Diagnostics) -> Self {
        Self {
            diagnostics,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Scan `root_path` and, in repair mode without dry run, fix it.
    ///
    /// Configuration problems (no root, missing root, missing or escaping
    /// quarantine path) are errors. Blocked entries and failed moves are
    /// reported in the result.
    pub fn run(
        &self,
        contract: &RootIntegrityContract,
        root_path: Option<&Path>,
        mode: IntegrityMode,
        dry_run: bool,
        overrides: &IntegrityOverrides,
    ) -> Result<RootIntegrityResult> {
        let root = root_path.ok_or_else(|| {
            ProvisioningError::MissingRootPath(format!(
                "{}/{}",
                contract.provider_key, contract.root_key
            ))
        })?;
        if !root.is_dir() {
            return Err(ProvisioningError::RootNotFound(root.to_path_buf()));
        }

        let limits = MeasureLimits {
            max_items: overrides.max_items.unwrap_or(contract.max_items),
            max_bytes: overrides.max_bytes.unwrap_or(contract.max_bytes),
        };
        let allow = AllowList::new(
            contract.allowed_extras.iter().chain(&overrides.allowed_extras),
            contract
                .allowed_root_files
                .iter()
                .chain(&overrides.allowed_root_files),
        );
        let quarantine_relpath = overrides
            .quarantine_relpath
            .clone()
            .or_else(|| contract.quarantine_relpath.clone());
        let quarantine_top = quarantine_relpath
            .as_deref()
            .and_then(|rel| validate_relative_path(rel).ok())
            .and_then(|segments| segments.first().map(ToString::to_string));

        let mutates = mode == IntegrityMode::Repair && !dry_run;
        let mut result = RootIntegrityResult {
            provider_key: contract.provider_key.clone(),
            root_key: contract.root_key.clone(),
            contract_version: contract.version,
            root_path: root.to_path_buf(),
            mode,
            dry_run,
            limits,
            quarantine_path: None,
            unknown_folders: Vec::new(),
            root_files: Vec::new(),
            missing_required: Vec::new(),
            created_required: Vec::new(),
            moved_count: 0,
            warnings: Vec::new(),
            errors: Vec::new(),
        };

        let mut names = Vec::new();
        let read_dir = std::fs::read_dir(root).map_err(|e| ProvisioningError::DirectoryRead {
            path: root.to_path_buf(),
            source: e,
        })?;
        for entry in read_dir {
            match entry {
                Ok(entry) => names.push(entry.file_name().to_string_lossy().into_owned()),
                Err(e) => result.errors.push(format!("failed to read entry: {e}")),
            }
        }
        names.sort();

        for name in names {
            let path = root.join(&name);
            if is_reparse_point(&path) {
                let kind = if path.is_dir() {
                    EntryKind::Folder
                } else {
                    EntryKind::File
                };
                let mut flagged = RootIntegrityEntry::new(name, kind, path);
                flagged.is_reparse_point = true;
                flagged.block(BlockedReason::ReparsePoint);
                push_entry(&mut result, flagged);
                continue;
            }

            if path.is_dir() {
                if contract.is_declared_folder(&name)
                    || quarantine_top.as_deref() == Some(name.as_str())
                    || allow.is_allowed_extra(&name)
                {
                    continue;
                }
                let mut flagged = RootIntegrityEntry::new(name, EntryKind::Folder, path);
                if mutates {
                    flagged.apply(measure_dir(&flagged.path, limits));
                }
                push_entry(&mut result, flagged);
            } else {
                if allow.is_allowed_root_file(&name) {
                    continue;
                }
                let mut flagged = RootIntegrityEntry::new(name, EntryKind::File, path);
                flagged.apply(measure_file(&flagged.path, limits));
                push_entry(&mut result, flagged);
            }
        }

        for folder in &contract.required_folders {
            if !root.join(folder).is_dir() {
                result.missing_required.push(folder.clone());
                result
                    .warnings
                    .push(format!("missing required folder '{folder}'"));
            }
        }

        if mode == IntegrityMode::Repair {
            match quarantine_relpath.as_deref() {
                Some(relpath) => {
                    let base = resolve_quarantine(root, relpath)?;
                    let stamp = Utc::now().format(QUARANTINE_TIMESTAMP_FORMAT).to_string();
                    result.quarantine_path = Some(base.join(stamp));
                }
                None if mutates => return Err(ProvisioningError::MissingQuarantinePath),
                None => result
                    .warnings
                    .push("no quarantine path configured; repair would fail".to_string()),
            }
        }

        if mutates {
            self.repair(root, &mut result);
        } else if let Some(quarantine) = result.quarantine_path.clone() {
            for entry in result
                .unknown_folders
                .iter_mut()
                .chain(result.root_files.iter_mut())
                .filter(|e| e.will_move)
            {
                entry.destination = Some(quarantine.join(&entry.name));
            }
        }

        self.diagnostics.info(
            COMPONENT,
            &format!(
                "{mode} {}/{}: {} unknown folders, {} root files, {} missing required, {} moved",
                result.provider_key,
                result.root_key,
                result.unknown_folders.len(),
                result.root_files.len(),
                result.missing_required.len(),
                result.moved_count
            ),
        );
        Ok(result)
    }

    fn repair(&self, root: &Path, result: &mut RootIntegrityResult) {
        for folder in result.missing_required.clone() {
            let path = root.join(&folder);
            match std::fs::create_dir_all(&path) {
                Ok(()) => result.created_required.push(folder),
                Err(e) => result
                    .errors
                    .push(format!("failed to create required folder '{folder}': {e}")),
            }
        }

        let Some(quarantine) = result.quarantine_path.clone() else {
            return;
        };
        let has_candidates = result.entries().any(|e| e.will_move);
        if !has_candidates {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(&quarantine) {
            result.errors.push(format!(
                "failed to create quarantine folder {}: {e}",
                quarantine.display()
            ));
            return;
        }

        let mut errors = Vec::new();
        let mut moved = 0;
        for entry in result
            .unknown_folders
            .iter_mut()
            .chain(result.root_files.iter_mut())
            .filter(|e| e.will_move)
        {
            let destination = unique_destination(&quarantine, &entry.name, entry.kind);
            match move_path(&entry.path, &destination, &self.retry) {
                Ok(()) => {
                    entry.moved = true;
                    moved += 1;
                }
                Err(e) => {
                    self.diagnostics
                        .warn(COMPONENT, &format!("quarantine move failed: {e}"));
                    errors.push(format!("{}: {e}", entry.name));
                }
            }
            entry.destination = Some(destination);
        }
        result.moved_count = moved;
        result.errors.extend(errors);
    }
}

fn push_entry(result: &mut RootIntegrityResult, entry: RootIntegrityEntry) {
    match entry.kind {
        EntryKind::Folder => result.unknown_folders.push(entry),
        EntryKind::File => result.root_files.push(entry),
    }
}

/// Resolve the quarantine base, refusing anything that escapes `root`,
/// either lexically or through a linked folder on the way down.
fn resolve_quarantine(root: &Path, relpath: &str) -> Result<PathBuf> {
    let outside = || ProvisioningError::QuarantineOutsideRoot(relpath.to_string());
    let joined = join_relative(root, relpath).map_err(|_| outside())?;
    if !is_strictly_within(root, &joined) {
        return Err(outside());
    }
    if let Some(link) = reparse_point_below(root, &joined) {
        tracing::warn!(link = %link.display(), "Quarantine path goes through a link");
        return Err(outside());
    }
    Ok(joined)
}

/// `name`, then `name_1`, `name_2`, ... Files keep their extension.
fn unique_destination(dir: &Path, name: &str, kind: EntryKind) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, extension) = match (kind, name.rsplit_once('.')) {
        (EntryKind::File, Some((stem, ext))) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut n = 1u32;
    loop {
        let numbered = match extension {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(numbered);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::NullDiagnostics;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn contract() -> RootIntegrityContract {
        RootIntegrityContract {
            required_folders: vec!["00_Admin".to_string(), "01_Projects_Active".to_string()],
            optional_folders: vec!["99_TestRuns".to_string()],
            allowed_extras: vec![".dropbox*".to_string()],
            allowed_root_files: vec!["desktop.ini".to_string()],
            quarantine_relpath: Some("97_Quarantine/unsorted".to_string()),
            max_items: 10,
            max_bytes: 1024 * 1024,
            ..RootIntegrityContract::new("dropbox", "domain_root")
        }
    }

    fn checker() -> RootIntegrityChecker<'static> {
        RootIntegrityChecker::new(&NullDiagnostics).with_retry(RetryConfig::immediate(1))
    }

    #[test]
    fn test_report_classifies_without_mutation() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("00_Admin")).expect("mkdir");
        std::fs::create_dir_all(root.join(".dropbox.cache")).expect("mkdir");
        std::fs::create_dir_all(root.join("Stray")).expect("mkdir");
        std::fs::write(root.join("Desktop.ini"), "").expect("write");
        std::fs::write(root.join("notes.txt"), "hello").expect("write");

        let result = checker()
            .run(
                &contract(),
                Some(root),
                IntegrityMode::Report,
                false,
                &IntegrityOverrides::default(),
            )
            .expect("run");

        assert_eq!(result.missing_required, vec!["01_Projects_Active".to_string()]);
        assert_eq!(result.warnings.len(), 1);
        let stray = result.entry("Stray").expect("stray flagged");
        assert_eq!(stray.size_bytes, None);
        assert!(stray.will_move);
        assert_eq!(result.entry("notes.txt").and_then(|e| e.size_bytes), Some(5));
        assert!(result.entry("Desktop.ini").is_none());
        assert!(result.entry(".dropbox.cache").is_none());
        assert!(root.join("Stray").exists());
        assert!(!root.join("01_Projects_Active").exists());
        assert_eq!(result.quarantine_path, None);
    }

    #[test]
    fn test_repair_moves_and_creates_required() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("Stray/inner")).expect("mkdir");
        std::fs::write(root.join("notes.txt"), "hello").expect("write");

        let result = checker()
            .run(
                &contract(),
                Some(root),
                IntegrityMode::Repair,
                false,
                &IntegrityOverrides::default(),
            )
            .expect("run");

        assert!(!result.has_errors(), "{:?}", result.errors);
        assert_eq!(result.moved_count, 2);
        assert_eq!(result.created_required.len(), 2);
        assert!(root.join("00_Admin").is_dir());
        let quarantine = result.quarantine_path.clone().expect("quarantine");
        assert!(quarantine.starts_with(root.join("97_Quarantine/unsorted")));
        assert!(quarantine.join("Stray/inner").is_dir());
        assert!(quarantine.join("notes.txt").is_file());
        assert!(!root.join("Stray").exists());
        // Missing required folders stay warnings even after repair.
        assert_eq!(result.missing_required.len(), 2);

        let again = checker()
            .run(
                &contract(),
                Some(root),
                IntegrityMode::Report,
                false,
                &IntegrityOverrides::default(),
            )
            .expect("rerun");
        assert!(again.is_clean());
    }

    #[test]
    fn test_item_ceiling_does_not_block_root_files() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        std::fs::write(root.join("notes.txt"), "hello").expect("write");
        let overrides = IntegrityOverrides {
            max_items: Some(0),
            ..Default::default()
        };

        let result = checker()
            .run(&contract(), Some(root), IntegrityMode::Repair, false, &overrides)
            .expect("run");
        let notes = result.entry("notes.txt").expect("flagged");
        assert_eq!(notes.blocked_reason, None);
        assert!(notes.moved);
        assert_eq!(result.moved_count, 1);
    }

    #[test]
    fn test_dry_run_reports_destinations_only() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("Stray")).expect("mkdir");

        let result = checker()
            .run(
                &contract(),
                Some(root),
                IntegrityMode::Repair,
                true,
                &IntegrityOverrides::default(),
            )
            .expect("run");

        let stray = result.entry("Stray").expect("flagged");
        assert!(stray.destination.is_some());
        assert!(!stray.moved);
        assert!(root.join("Stray").exists());
        assert!(!root.join("97_Quarantine").exists());
        assert!(result.created_required.is_empty());
    }

    #[test]
    fn test_root_configuration_errors() {
        let dir = TempDir::new().expect("tempdir");
        let err = checker()
            .run(
                &contract(),
                None,
                IntegrityMode::Report,
                false,
                &IntegrityOverrides::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::MissingRootPath(_)));

        let err = checker()
            .run(
                &contract(),
                Some(&dir.path().join("gone")),
                IntegrityMode::Report,
                false,
                &IntegrityOverrides::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::RootNotFound(_)));
    }

    #[test]
    fn test_repair_requires_quarantine_path() {
        let dir = TempDir::new().expect("tempdir");
        let mut contract = contract();
        contract.quarantine_relpath = None;
        let err = checker()
            .run(
                &contract,
                Some(dir.path()),
                IntegrityMode::Repair,
                false,
                &IntegrityOverrides::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::MissingQuarantinePath));
        assert!(dir.path().read_dir().expect("read").next().is_none());
    }

    #[test]
    fn test_quarantine_must_stay_inside_root() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("root");
        std::fs::create_dir_all(root.join("Stray")).expect("mkdir");
        let overrides = IntegrityOverrides {
            quarantine_relpath: Some("../outside".to_string()),
            ..Default::default()
        };

        let err = checker()
            .run(&contract(), Some(&root), IntegrityMode::Repair, false, &overrides)
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::QuarantineOutsideRoot(_)));
        assert!(!dir.path().join("outside").exists());
        assert!(!root.join("00_Admin").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_linked_quarantine_folder_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(root.join("Stray")).expect("mkdir");
        std::fs::create_dir_all(&outside).expect("mkdir");
        std::os::unix::fs::symlink(&outside, root.join("97_Quarantine")).expect("symlink");

        let err = checker()
            .run(
                &contract(),
                Some(&root),
                IntegrityMode::Repair,
                false,
                &IntegrityOverrides::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::QuarantineOutsideRoot(_)));
        assert!(root.join("Stray").is_dir());
        assert!(!root.join("00_Admin").exists());
        assert!(outside.read_dir().expect("read").next().is_none());
    }

    #[test]
    fn test_collisions_get_numeric_suffix() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("clip.mov"), "a").expect("write");
        std::fs::create_dir_all(dir.path().join("Stray")).expect("mkdir");
        assert_eq!(
            unique_destination(dir.path(), "clip.mov", EntryKind::File),
            dir.path().join("clip_1.mov")
        );
        assert_eq!(
            unique_destination(dir.path(), "Stray", EntryKind::Folder),
            dir.path().join("Stray_1")
        );
        assert_eq!(
            unique_destination(dir.path(), "fresh", EntryKind::Folder),
            dir.path().join("fresh")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_reparse_points_are_flagged_not_measured() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("root");
        std::fs::create_dir_all(root.join("00_Admin")).expect("mkdir");
        std::fs::create_dir_all(dir.path().join("elsewhere")).expect("mkdir");
        std::os::unix::fs::symlink(dir.path().join("elsewhere"), root.join("Linked"))
            .expect("symlink");

        let result = checker()
            .run(
                &contract(),
                Some(&root),
                IntegrityMode::Repair,
                false,
                &IntegrityOverrides::default(),
            )
            .expect("run");
        let linked = result.entry("Linked").expect("flagged");
        assert!(linked.is_reparse_point);
        assert_eq!(linked.blocked_reason, Some(BlockedReason::ReparsePoint));
        assert_eq!(linked.size_bytes, None);
        assert!(!linked.moved);
        assert!(root.join("Linked").exists());
    }
}
