//! Project archive across the three domain roles.
//!
//! Progress is read back from folder existence rather than stored, so a run
//! interrupted at any step picks up where it left off when re-run:
//!
//! 1. cloud-sync: move active -> to-archive staging
//! 2. production: check the production container is present
//! 3. archival: provision the archive container and snapshot production
//! 4. cloud-sync: move staging -> archived, only once step 3 succeeded

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cleanup::{CleanupOutcome, FsTreeRemover, TreeRemover, cleanup_test_artifacts_with};
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::domains::{DomainDefinition, DomainKey, DomainRole, RootResolution, RootResolver};
use crate::error::{ProvisioningError, Result};
use crate::executor::ExecutionMode;
use crate::fsops::{CopyReport, copy_tree, move_path};
use crate::project::{AuditKind, GateBlock, ProjectRecord, ProjectStatus};
use crate::provision::{FolderProvisioner, Placement, ProvisioningRequest, ProvisioningSummary};
use crate::template::ProvisioningTokens;

const COMPONENT: &str = "archive";

/// Folder inside the archive container that receives the production copy.
pub const PRODUCTION_SNAPSHOT_DIR: &str = "90_Production_Snapshot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveState {
    // cloud-sync
    AlreadyArchived,
    ReadyToArchive,
    MoveFailed,
    ContainerMissing,
    Archived,
    ArchiveMoveFailed,
    ArchiveMoveMissing,
    // production
    SourceFound,
    SourceMissing,
    // archival
    ArchiveVerified,
    CopyFailed,
    ArchiveProvisionFailed,
    // any domain
    SkippedUnconfigured,
    BlockedSandboxOutsideRepo,
    BlockedMissingRoot,
    BlockedTestCleanup,
    CleanupLocked,
    CleanupFailed,
    BlockedNonRealData,
    BlockedStatusNotReady,
    BlockedAlreadyArchiving,
}

impl ArchiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveState::AlreadyArchived => "already_archived",
            ArchiveState::ReadyToArchive => "ready_to_archive",
            ArchiveState::MoveFailed => "move_failed",
            ArchiveState::ContainerMissing => "container_missing",
            ArchiveState::Archived => "archived",
            ArchiveState::ArchiveMoveFailed => "archive_move_failed",
            ArchiveState::ArchiveMoveMissing => "archive_move_missing",
            ArchiveState::SourceFound => "source_found",
            ArchiveState::SourceMissing => "source_missing",
            ArchiveState::ArchiveVerified => "archive_verified",
            ArchiveState::CopyFailed => "copy_failed",
            ArchiveState::ArchiveProvisionFailed => "archive_provision_failed",
            ArchiveState::SkippedUnconfigured => "skipped_unconfigured",
            ArchiveState::BlockedSandboxOutsideRepo => "blocked_sandbox_outside_repo",
            ArchiveState::BlockedMissingRoot => "blocked_missing_root",
            ArchiveState::BlockedTestCleanup => "blocked_test_cleanup",
            ArchiveState::CleanupLocked => "cleanup_locked",
            ArchiveState::CleanupFailed => "cleanup_failed",
            ArchiveState::BlockedNonRealData => "blocked_non_real_data",
            ArchiveState::BlockedStatusNotReady => "blocked_status_not_ready",
            ArchiveState::BlockedAlreadyArchiving => "blocked_already_archiving",
        }
    }

    pub fn is_hard_failure(&self) -> bool {
        let state = self.as_str();
        state.starts_with("blocked_")
            || state.starts_with("cleanup_")
            || state.ends_with("_failed")
            || matches!(
                self,
                ArchiveState::ContainerMissing | ArchiveState::ArchiveMoveMissing
            )
    }

    fn from_gate(block: GateBlock) -> Self {
        match block {
            GateBlock::NonRealData => ArchiveState::BlockedNonRealData,
            GateBlock::AlreadyArchiving => ArchiveState::BlockedAlreadyArchiving,
            GateBlock::StatusNotReady | GateBlock::AlreadyProvisioning => {
                ArchiveState::BlockedStatusNotReady
            }
        }
    }
}

impl fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    pub test_mode: bool,
    pub allow_test_cleanup: bool,
    pub allow_repair: bool,
    pub force_sandbox: bool,
    pub allow_non_real_data: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            test_mode: false,
            allow_test_cleanup: false,
            allow_repair: true,
            force_sandbox: false,
            allow_non_real_data: false,
        }
    }
}

/// The three locations a project moves through on the cloud-sync root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSyncPaths {
    pub active: PathBuf,
    pub staging: PathBuf,
    pub archived: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainArchiveResult {
    pub domain_key: DomainKey,
    pub root_path: Option<PathBuf>,
    pub state: ArchiveState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_paths: Option<CloudSyncPaths>,
    /// Production container (production) or archive container (archival).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisioningSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<ProvisioningSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<CopyReport>,
    pub notes: Vec<String>,
}

impl DomainArchiveResult {
    fn new(domain_key: DomainKey, state: ArchiveState) -> Self {
        Self {
            domain_key,
            root_path: None,
            state,
            cloud_paths: None,
            container_path: None,
            provisioning: None,
            verification: None,
            snapshot: None,
            notes: Vec::new(),
        }
    }

    fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    fn first_nested_error(&self) -> Option<&str> {
        [&self.provisioning, &self.verification]
            .into_iter()
            .flatten()
            .find_map(ProvisioningSummary::first_error)
    }

    pub fn is_failing(&self) -> bool {
        self.state.is_hard_failure() || self.first_nested_error().is_some()
    }

    /// Archival states that allow the cloud-sync finalize step.
    pub fn is_archival_success(&self) -> bool {
        matches!(
            self.state,
            ArchiveState::ArchiveVerified | ArchiveState::SourceMissing
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResult {
    pub project_code: String,
    pub test_mode: bool,
    pub domains: Vec<DomainArchiveResult>,
    pub has_errors: bool,
    pub last_error: Option<String>,
    pub status_after: Option<ProjectStatus>,
}

impl ArchiveResult {
    fn aggregate(
        project_code: &str,
        test_mode: bool,
        gated: bool,
        domains: Vec<DomainArchiveResult>,
    ) -> Self {
        let hard_failure = domains.iter().any(DomainArchiveResult::is_failing);
        let completed = domains.iter().any(|d| {
            d.domain_key.role() == DomainRole::CloudSync
                && matches!(d.state, ArchiveState::Archived | ArchiveState::AlreadyArchived)
        });
        let has_errors = hard_failure || !completed;

        let last_error = if has_errors {
            domains
                .iter()
                .find_map(|d| d.first_nested_error().map(str::to_string))
                .or_else(|| {
                    domains
                        .iter()
                        .filter(|d| d.is_failing())
                        .find_map(|d| d.notes.first().cloned())
                })
                .or_else(|| Some("archive did not complete".to_string()))
        } else {
            None
        };

        let status_after = match (gated, has_errors) {
            (true, _) => None,
            (false, true) => Some(ProjectStatus::ArchiveFailed),
            (false, false) => Some(ProjectStatus::Archived),
        };

        Self {
            project_code: project_code.to_string(),
            test_mode,
            domains,
            has_errors,
            last_error,
            status_after,
        }
    }

    pub fn domain(&self, key: DomainKey) -> Option<&DomainArchiveResult> {
        self.domains.iter().find(|d| d.domain_key == key)
    }
}

impl ProjectRecord {
    /// Apply an archive outcome: status transition plus audit entry.
    pub fn apply_archive(&mut self, result: &ArchiveResult) {
        self.record_run(
            AuditKind::Archive,
            !result.has_errors,
            result.status_after,
            result.last_error.clone(),
        );
    }
}

/// Per-project archive across cloud-sync, production and archival roots.
pub struct ArchiveOrchestrator<'a> {
    config: &'a EngineConfig,
    domains: Vec<DomainDefinition>,
    provisioner: FolderProvisioner<'a>,
    remover: &'a dyn TreeRemover,
    diagnostics: &'a dyn Diagnostics,
}

impl<'a> ArchiveOrchestrator<'a> {
    pub fn new(config: &'a EngineConfig, diagnostics: &'a dyn Diagnostics) -> Self {
        Self {
            config,
            domains: DomainDefinition::standard(&config.templates_dir),
            provisioner: FolderProvisioner::new(diagnostics)
                .with_manifest(config.manifest.enabled),
            remover: &FsTreeRemover,
            diagnostics,
        }
    }

    pub fn with_domains(mut self, domains: Vec<DomainDefinition>) -> Self {
        self.domains = domains;
        self
    }

    /// Replace how stale test containers are deleted.
    pub fn with_remover(mut self, remover: &'a dyn TreeRemover) -> Self {
        self.remover = remover;
        self
    }

    fn definition(&self, role: DomainRole) -> Option<&DomainDefinition> {
        self.domains.iter().find(|d| d.key.role() == role)
    }

    pub fn run(&self, project: &ProjectRecord, options: &ArchiveOptions) -> Result<ArchiveResult> {
        if let Some(block) = project.archive_gate(options.allow_non_real_data) {
            let note = match block {
                GateBlock::NonRealData => format!(
                    "project {} is not real data; set allow_non_real_data to override",
                    project.code
                ),
                GateBlock::AlreadyArchiving => {
                    format!("project {} is already being archived", project.code)
                }
                _ => format!(
                    "project {} has status {} which does not allow archive",
                    project.code, project.status
                ),
            };
            self.diagnostics.warn(COMPONENT, &note);
            let domains = self
                .domains
                .iter()
                .map(|d| {
                    DomainArchiveResult::new(d.key, ArchiveState::from_gate(block))
                        .with_note(note.clone())
                })
                .collect();
            return Ok(ArchiveResult::aggregate(
                &project.code,
                options.test_mode,
                true,
                domains,
            ));
        }

        let resolver = RootResolver::new(self.config).with_forced_sandbox(options.force_sandbox);
        let tokens = project.tokens();

        let cloud = match self.definition(DomainRole::CloudSync) {
            Some(def) => Some(self.inspect_cloud_sync(def, &resolver, &tokens, options.test_mode)?),
            None => None,
        };
        let production = match self.definition(DomainRole::Production) {
            Some(def) => Some(self.check_production(def, &resolver, &tokens, options.test_mode)?),
            None => None,
        };
        let archival = match self.definition(DomainRole::Archival) {
            Some(def) => Some(self.provision_archive(
                def,
                &resolver,
                &tokens,
                production.as_ref(),
                options,
            )?),
            None => None,
        };

        let cloud = cloud.map(|cloud| {
            let archival_ok = archival
                .as_ref()
                .is_some_and(DomainArchiveResult::is_archival_success);
            let finalizable = matches!(
                cloud.state,
                ArchiveState::ReadyToArchive | ArchiveState::AlreadyArchived
            );
            if archival_ok && finalizable {
                self.finalize_cloud_sync(&cloud)
            } else {
                cloud
            }
        });

        let domains: Vec<DomainArchiveResult> = [cloud, production, archival]
            .into_iter()
            .flatten()
            .collect();
        for domain in &domains {
            self.diagnostics.info(
                COMPONENT,
                &format!("{} {}: {}", project.code, domain.domain_key, domain.state),
            );
        }
        Ok(ArchiveResult::aggregate(&project.code, options.test_mode, false, domains))
    }

    /// Resolve a root that must already exist.
    fn existing_root(
        &self,
        key: DomainKey,
        resolver: &RootResolver<'_>,
    ) -> std::result::Result<PathBuf, DomainArchiveResult> {
        match resolver.resolve(key) {
            RootResolution::Unconfigured => Err(DomainArchiveResult::new(
                key,
                ArchiveState::SkippedUnconfigured,
            )
            .with_note(format!("no root configured for {key}"))),
            RootResolution::OutsideSandbox(path) => {
                let mut result =
                    DomainArchiveResult::new(key, ArchiveState::BlockedSandboxOutsideRepo)
                        .with_note(format!("{} is outside the sandbox directory", path.display()));
                result.root_path = Some(path);
                Err(result)
            }
            RootResolution::Resolved(path) if !path.is_dir() => {
                let mut result = DomainArchiveResult::new(key, ArchiveState::BlockedMissingRoot)
                    .with_note(format!("root {} does not exist", path.display()));
                result.root_path = Some(path);
                Err(result)
            }
            RootResolution::Resolved(path) => Ok(path),
        }
    }

    /// Container path for `template` under `base`, from the template's root name.
    fn container_under(
        &self,
        template: &Path,
        tokens: &ProvisioningTokens,
        base: PathBuf,
    ) -> Result<PathBuf> {
        let request = ProvisioningRequest::new(
            template,
            tokens.clone(),
            Placement::Under(base),
            ExecutionMode::Plan,
        );
        Ok(self.provisioner.plan(&request)?.target_root)
    }

    /// Cloud-sync step: decide from folder existence and move active into
    /// staging when needed.
    pub fn inspect_cloud_sync(
        &self,
        definition: &DomainDefinition,
        resolver: &RootResolver<'_>,
        tokens: &ProvisioningTokens,
        test_mode: bool,
    ) -> Result<DomainArchiveResult> {
        let root = match self.existing_root(definition.key, resolver) {
            Ok(root) => root,
            Err(result) => return Ok(result),
        };
        let base = definition.mode_base(&root, test_mode);
        let active = self.container_under(
            &definition.project_template,
            tokens,
            base.join(&definition.projects_subfolder),
        )?;
        let name = active
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .ok_or_else(|| {
                ProvisioningError::InvalidTemplate("container has no name".to_string())
            })?;
        let staging_dir = definition
            .to_archive_subfolder
            .as_deref()
            .ok_or_else(|| {
                ProvisioningError::InvalidTemplate(format!(
                    "{} has no to-archive folder",
                    definition.key
                ))
            })?;
        let archived_dir = definition
            .archived_subfolder
            .as_deref()
            .ok_or_else(|| {
                ProvisioningError::InvalidTemplate(format!(
                    "{} has no archived folder",
                    definition.key
                ))
            })?;
        let paths = CloudSyncPaths {
            staging: base.join(staging_dir).join(&name),
            archived: base.join(archived_dir).join(&name),
            active,
        };

        let mut result = DomainArchiveResult::new(definition.key, ArchiveState::ContainerMissing);
        result.root_path = Some(root);

        if paths.archived.exists() {
            result.state = ArchiveState::AlreadyArchived;
        } else if paths.staging.exists() {
            result.state = ArchiveState::ReadyToArchive;
        } else if paths.active.exists() {
            match move_path(&paths.active, &paths.staging, &self.config.cleanup_retry) {
                Ok(()) => result.state = ArchiveState::ReadyToArchive,
                Err(e) => {
                    result.notes.push(format!("move to staging failed: {e}"));
                    result.state = ArchiveState::MoveFailed;
                }
            }
        } else {
            result
                .notes
                .push(format!("no project folder at {}", paths.active.display()));
        }
        result.cloud_paths = Some(paths);
        Ok(result)
    }

    /// Finalize step: move staging into archived. Returns a new value.
    pub fn finalize_cloud_sync(&self, prior: &DomainArchiveResult) -> DomainArchiveResult {
        let mut next = prior.clone();
        if prior.state != ArchiveState::ReadyToArchive {
            return next;
        }
        let Some(paths) = &prior.cloud_paths else {
            next.state = ArchiveState::ArchiveMoveMissing;
            return next;
        };
        if !paths.staging.exists() {
            next.notes
                .push(format!("staging folder {} disappeared", paths.staging.display()));
            next.state = ArchiveState::ArchiveMoveMissing;
            return next;
        }
        match move_path(&paths.staging, &paths.archived, &self.config.cleanup_retry) {
            Ok(()) => next.state = ArchiveState::Archived,
            Err(e) => {
                let missing = e
                    .io_source()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
                next.notes.push(format!("move to archived failed: {e}"));
                next.state = if missing {
                    ArchiveState::ArchiveMoveMissing
                } else {
                    ArchiveState::ArchiveMoveFailed
                };
            }
        }
        next
    }

    /// Production step: read-only presence check.
    pub fn check_production(
        &self,
        definition: &DomainDefinition,
        resolver: &RootResolver<'_>,
        tokens: &ProvisioningTokens,
        test_mode: bool,
    ) -> Result<DomainArchiveResult> {
        let root = match self.existing_root(definition.key, resolver) {
            Ok(root) => root,
            Err(result) => return Ok(result),
        };
        let container = self.container_under(
            &definition.project_template,
            tokens,
            definition.container_base(&root, test_mode),
        )?;
        let state = if container.is_dir() {
            ArchiveState::SourceFound
        } else {
            ArchiveState::SourceMissing
        };
        let mut result = DomainArchiveResult::new(definition.key, state);
        result.root_path = Some(root);
        result.container_path = Some(container);
        Ok(result)
    }

    /// Archival step: provision and verify the archive container, then copy
    /// the production container into its snapshot folder.
    pub fn provision_archive(
        &self,
        definition: &DomainDefinition,
        resolver: &RootResolver<'_>,
        tokens: &ProvisioningTokens,
        production: Option<&DomainArchiveResult>,
        options: &ArchiveOptions,
    ) -> Result<DomainArchiveResult> {
        let root = match self.existing_root(definition.key, resolver) {
            Ok(root) => root,
            Err(result) => return Ok(result),
        };
        let request = ProvisioningRequest::new(
            &definition.project_template,
            tokens.clone(),
            Placement::Under(definition.container_base(&root, options.test_mode)),
            ExecutionMode::Apply,
        );
        let target = self.provisioner.plan(&request)?.target_root;

        let mut result =
            DomainArchiveResult::new(definition.key, ArchiveState::ArchiveProvisionFailed);
        result.root_path = Some(root.clone());
        result.container_path = Some(target.clone());

        if options.test_mode {
            let outcome = cleanup_test_artifacts_with(
                self.remover,
                &root,
                &target,
                options.allow_test_cleanup,
                &self.config.cleanup_retry,
            );
            let blocked = match outcome {
                CleanupOutcome::NotNeeded | CleanupOutcome::Deleted => None,
                CleanupOutcome::Blocked { reason } => Some((
                    ArchiveState::BlockedTestCleanup,
                    format!("test cleanup refused: {reason}"),
                )),
                CleanupOutcome::Locked { attempts, last_error } => Some((
                    ArchiveState::CleanupLocked,
                    format!("still locked after {attempts} attempts: {last_error}"),
                )),
                CleanupOutcome::Failed { error } => Some((ArchiveState::CleanupFailed, error)),
            };
            if let Some((state, note)) = blocked {
                result.state = state;
                result.notes.push(note);
                return Ok(result);
            }
        }

        let applied = self.provisioner.run(&request)?;
        let applied_errors = applied.has_errors();
        result.provisioning = Some(applied);
        if applied_errors {
            result
                .notes
                .push(format!("failed to provision archive container {}", target.display()));
            return Ok(result);
        }
        let verified = self.provisioner.verify_or_repair(&request, options.allow_repair)?;
        let verified_ok = verified.is_success();
        result.verification = Some(verified);
        if !verified_ok {
            result
                .notes
                .push(format!("archive container {} failed verification", target.display()));
            return Ok(result);
        }

        let source = production
            .filter(|p| p.state == ArchiveState::SourceFound)
            .and_then(|p| p.container_path.clone());
        let Some(source) = source else {
            result.state = ArchiveState::SourceMissing;
            result
                .notes
                .push("production container not found; snapshot skipped".to_string());
            return Ok(result);
        };

        let snapshot_dir = target.join(PRODUCTION_SNAPSHOT_DIR);
        match copy_tree(&source, &snapshot_dir) {
            Ok(report) => {
                if report.is_complete() {
                    result.state = ArchiveState::ArchiveVerified;
                } else {
                    result.notes.push(format!(
                        "{} files failed to copy into {}",
                        report.failures.len(),
                        snapshot_dir.display()
                    ));
                    result.state = ArchiveState::CopyFailed;
                }
                result.snapshot = Some(report);
            }
            Err(e) => {
                result.notes.push(format!("snapshot copy failed: {e}"));
                result.state = ArchiveState::CopyFailed;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hard_failure_states() {
        assert!(ArchiveState::ContainerMissing.is_hard_failure());
        assert!(ArchiveState::ArchiveMoveMissing.is_hard_failure());
        assert!(ArchiveState::CopyFailed.is_hard_failure());
        assert!(ArchiveState::BlockedAlreadyArchiving.is_hard_failure());
        assert!(!ArchiveState::SourceMissing.is_hard_failure());
        assert!(!ArchiveState::ReadyToArchive.is_hard_failure());
    }

    #[test]
    fn test_aggregate_requires_cloud_sync_archived() {
        let ready = DomainArchiveResult::new(DomainKey::Dropbox, ArchiveState::ReadyToArchive);
        let verified = DomainArchiveResult::new(DomainKey::Nas, ArchiveState::ArchiveVerified);
        let result = ArchiveResult::aggregate("P1", false, false, vec![ready, verified.clone()]);
        assert!(result.has_errors);
        assert_eq!(result.status_after, Some(ProjectStatus::ArchiveFailed));
        assert_eq!(result.last_error.as_deref(), Some("archive did not complete"));

        let archived = DomainArchiveResult::new(DomainKey::Dropbox, ArchiveState::Archived);
        let result = ArchiveResult::aggregate("P1", false, false, vec![archived, verified]);
        assert!(!result.has_errors);
        assert_eq!(result.status_after, Some(ProjectStatus::Archived));
    }

    #[test]
    fn test_apply_archive_records_audit() {
        let mut project = ProjectRecord::new("P1", "Demo").with_status(ProjectStatus::Active);
        let result = ArchiveResult::aggregate(
            "P1",
            false,
            false,
            vec![DomainArchiveResult::new(DomainKey::Dropbox, ArchiveState::AlreadyArchived)],
        );
        project.apply_archive(&result);
        assert_eq!(project.status, ProjectStatus::Archived);
        assert_eq!(project.audit_log.len(), 1);
        assert!(project.audit_log[0].succeeded);
    }
}
