//! Project bootstrap: make every configured domain root exist and verify,
//! then provision the project's container in each and derive the
//! storage-root registration the caller persists.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cleanup::{
    CleanupOutcome, FsTreeRemover, TreeRemover, cleanup_test_artifacts_with,
};
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::domains::{
    DomainDefinition, DomainKey, RootResolution, RootResolver, StorageRootRegistration,
};
use crate::error::Result;
use crate::executor::ExecutionMode;
use crate::project::{AuditKind, GateBlock, ProjectRecord, ProjectStatus};
use crate::provision::{FolderProvisioner, Placement, ProvisioningRequest, ProvisioningSummary};
use crate::template::ProvisioningTokens;

const COMPONENT: &str = "bootstrap";

/// Per-domain outcome vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootState {
    SkippedUnconfigured,
    BlockedSandboxOutsideRepo,
    BlockedMissingRoot,
    BlockedTestCleanup,
    CleanupLocked,
    CleanupFailed,
    ReadyExistingRoot,
    RootCreated,
    RootCreateFailed,
    RootVerified,
    RootVerifyFailed,
    ProjectProvisioned,
    ProjectProvisionFailed,
    RegistrationFailed,
    BlockedNonRealData,
    BlockedStatusNotReady,
    BlockedAlreadyProvisioning,
}

impl RootState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootState::SkippedUnconfigured => "skipped_unconfigured",
            RootState::BlockedSandboxOutsideRepo => "blocked_sandbox_outside_repo",
            RootState::BlockedMissingRoot => "blocked_missing_root",
            RootState::BlockedTestCleanup => "blocked_test_cleanup",
            RootState::CleanupLocked => "cleanup_locked",
            RootState::CleanupFailed => "cleanup_failed",
            RootState::ReadyExistingRoot => "ready_existing_root",
            RootState::RootCreated => "root_created",
            RootState::RootCreateFailed => "root_create_failed",
            RootState::RootVerified => "root_verified",
            RootState::RootVerifyFailed => "root_verify_failed",
            RootState::ProjectProvisioned => "project_provisioned",
            RootState::ProjectProvisionFailed => "project_provision_failed",
            RootState::RegistrationFailed => "registration_failed",
            RootState::BlockedNonRealData => "blocked_non_real_data",
            RootState::BlockedStatusNotReady => "blocked_status_not_ready",
            RootState::BlockedAlreadyProvisioning => "blocked_already_provisioning",
        }
    }

    /// `blocked_*`, `cleanup_*` and `*_failed` states.
    pub fn is_hard_failure(&self) -> bool {
        let state = self.as_str();
        state.starts_with("blocked_") || state.starts_with("cleanup_") || state.ends_with("_failed")
    }

    /// Root states from which a project container may be provisioned.
    pub fn is_root_ready(&self) -> bool {
        matches!(
            self,
            RootState::ReadyExistingRoot | RootState::RootCreated | RootState::RootVerified
        )
    }

    fn from_gate(block: GateBlock) -> Self {
        match block {
            GateBlock::NonRealData => RootState::BlockedNonRealData,
            GateBlock::AlreadyProvisioning => RootState::BlockedAlreadyProvisioning,
            GateBlock::StatusNotReady | GateBlock::AlreadyArchiving => {
                RootState::BlockedStatusNotReady
            }
        }
    }
}

impl fmt::Display for RootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Switches for one bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    /// Create a missing domain root from its template.
    pub create_roots: bool,
    /// Verify (and possibly repair) every root.
    pub verify_roots: bool,
    /// Let failed verifications run Repair.
    pub allow_repair: bool,
    /// Provision the project container in each ready root.
    pub provision_containers: bool,
    /// Use the isolated test-runs subtree of each root.
    pub test_mode: bool,
    /// Allow deleting stale test containers before re-provisioning.
    pub allow_test_cleanup: bool,
    /// Keep every root under the sandbox directory for this run.
    pub force_sandbox: bool,
    /// Bootstrap projects whose data is not classified as real.
    pub allow_non_real_data: bool,
    /// Restrict the run to these domains.
    pub domains: Option<Vec<DomainKey>>,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            create_roots: true,
            verify_roots: true,
            allow_repair: true,
            provision_containers: true,
            test_mode: false,
            allow_test_cleanup: false,
            force_sandbox: false,
            allow_non_real_data: false,
            domains: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainBootstrapResult {
    pub domain_key: DomainKey,
    pub root_path: Option<PathBuf>,
    pub root_state: RootState,
    pub root_provisioning: Option<ProvisioningSummary>,
    pub root_verification: Option<ProvisioningSummary>,
    pub project_provisioning: Option<ProvisioningSummary>,
    pub project_verification: Option<ProvisioningSummary>,
    pub container_path: Option<PathBuf>,
    pub registration: Option<StorageRootRegistration>,
    pub notes: Vec<String>,
}

impl DomainBootstrapResult {
    fn summaries(&self) -> impl Iterator<Item = &ProvisioningSummary> {
        [
            &self.root_provisioning,
            &self.root_verification,
            &self.project_provisioning,
            &self.project_verification,
        ]
        .into_iter()
        .flatten()
    }

    fn first_nested_error(&self) -> Option<&str> {
        self.summaries().find_map(ProvisioningSummary::first_error)
    }

    pub fn is_failing(&self) -> bool {
        self.root_state.is_hard_failure() || self.first_nested_error().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResult {
    pub project_code: String,
    pub test_mode: bool,
    pub domains: Vec<DomainBootstrapResult>,
    pub has_errors: bool,
    pub last_error: Option<String>,
    /// Status to move the project to; `None` leaves it unchanged.
    pub status_after: Option<ProjectStatus>,
}

impl BootstrapResult {
    fn aggregate(
        project_code: &str,
        test_mode: bool,
        containers_requested: bool,
        gated: bool,
        domains: Vec<DomainBootstrapResult>,
    ) -> Self {
        let hard_failure = domains.iter().any(DomainBootstrapResult::is_failing);
        let no_success = containers_requested
            && !domains
                .iter()
                .any(|d| d.root_state == RootState::ProjectProvisioned);
        let has_errors = hard_failure || no_success;

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
                .or_else(|| Some("bootstrap did not provision any project container".to_string()))
        } else {
            None
        };

        let status_after = match (gated, containers_requested) {
            (true, _) | (false, false) => None,
            (false, true) if has_errors => Some(ProjectStatus::ProvisionFailed),
            (false, true) => Some(ProjectStatus::Provisioned),
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

    pub fn domain(&self, key: DomainKey) -> Option<&DomainBootstrapResult> {
        self.domains.iter().find(|d| d.domain_key == key)
    }

    pub fn registrations(&self) -> Vec<&StorageRootRegistration> {
        self.domains
            .iter()
            .filter_map(|d| d.registration.as_ref())
            .collect()
    }
}

impl ProjectRecord {
    /// Apply a bootstrap outcome: status transition plus audit entry.
    pub fn apply_bootstrap(&mut self, result: &BootstrapResult) {
        self.record_run(
            AuditKind::Bootstrap,
            !result.has_errors,
            result.status_after,
            result.last_error.clone(),
        );
    }
}

/// Per-project bootstrap across all configured domains.
pub struct BootstrapOrchestrator<'a> {
    config: &'a EngineConfig,
    domains: Vec<DomainDefinition>,
    provisioner: FolderProvisioner<'a>,
    remover: &'a dyn TreeRemover,
    diagnostics: &'a dyn Diagnostics,
}

impl<'a> BootstrapOrchestrator<'a> {
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

    pub fn with_provisioner(mut self, provisioner: FolderProvisioner<'a>) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Replace how stale test containers are deleted.
    pub fn with_remover(mut self, remover: &'a dyn TreeRemover) -> Self {
        self.remover = remover;
        self
    }

    fn selected<'d>(
        &'d self,
        options: &'d BootstrapOptions,
    ) -> impl Iterator<Item = &'d DomainDefinition> {
        self.domains.iter().filter(move |d| {
            options
                .domains
                .as_ref()
                .is_none_or(|keys| keys.contains(&d.key))
        })
    }

    /// Run the bootstrap flow. Only structural problems (malformed
    /// templates, missing schemas) are returned as errors.
    pub fn run(
        &self,
        project: &ProjectRecord,
        options: &BootstrapOptions,
    ) -> Result<BootstrapResult> {
        if let Some(block) = project.bootstrap_gate(options.allow_non_real_data) {
            let note = match block {
                GateBlock::NonRealData => format!(
                    "project {} is not real data; set allow_non_real_data to override",
                    project.code
                ),
                GateBlock::AlreadyProvisioning => {
                    format!("project {} is already being provisioned", project.code)
                }
                _ => format!(
                    "project {} has status {} which does not allow bootstrap",
                    project.code, project.status
                ),
            };
            self.diagnostics.warn(COMPONENT, &note);
            let domains = self
                .selected(options)
                .map(|d| blocked_domain(d.key, RootState::from_gate(block), &note))
                .collect();
            return Ok(BootstrapResult::aggregate(
                &project.code,
                options.test_mode,
                options.provision_containers,
                true,
                domains,
            ));
        }

        let resolver = RootResolver::new(self.config).with_forced_sandbox(options.force_sandbox);
        let tokens = project.tokens();
        let mut domains = Vec::new();
        for definition in self.selected(options) {
            let result = self.run_domain(definition, &resolver, &tokens, options)?;
            self.diagnostics.info(
                COMPONENT,
                &format!("{} {}: {}", project.code, definition.key, result.root_state),
            );
            domains.push(result);
        }

        Ok(BootstrapResult::aggregate(
            &project.code,
            options.test_mode,
            options.provision_containers,
            false,
            domains,
        ))
    }

    fn run_domain(
        &self,
        definition: &DomainDefinition,
        resolver: &RootResolver<'_>,
        tokens: &ProvisioningTokens,
        options: &BootstrapOptions,
    ) -> Result<DomainBootstrapResult> {
        let mut result = DomainBootstrapResult {
            domain_key: definition.key,
            root_path: None,
            root_state: RootState::SkippedUnconfigured,
            root_provisioning: None,
            root_verification: None,
            project_provisioning: None,
            project_verification: None,
            container_path: None,
            registration: None,
            notes: Vec::new(),
        };

        let root = match resolver.resolve(definition.key) {
            RootResolution::Unconfigured => {
                result
                    .notes
                    .push(format!("no root configured for {}", definition.key));
                return Ok(result);
            }
            RootResolution::OutsideSandbox(path) => {
                let runtime_dir = &self.config.sandbox.runtime_dir;
                result.notes.push(if runtime_dir.is_absolute() {
                    format!(
                        "{} is outside the sandbox directory {}",
                        path.display(),
                        runtime_dir.display()
                    )
                } else {
                    format!(
                        "sandbox directory {} is not absolute",
                        runtime_dir.display()
                    )
                });
                result.root_path = Some(path);
                result.root_state = RootState::BlockedSandboxOutsideRepo;
                return Ok(result);
            }
            RootResolution::Resolved(path) => path,
        };
        result.root_path = Some(root.clone());

        let root_request = ProvisioningRequest::new(
            &definition.root_template,
            tokens.clone(),
            Placement::Into(root.clone()),
            ExecutionMode::Apply,
        );

        if !root.is_dir() {
            if !options.create_roots {
                result
                    .notes
                    .push(format!("root {} does not exist", root.display()));
                result.root_state = RootState::BlockedMissingRoot;
                return Ok(result);
            }
            let created = self.provisioner.run(&root_request)?;
            let created_ok = created.is_success();
            result.root_provisioning = Some(created);
            if !created_ok {
                result
                    .notes
                    .push(format!("failed to create root {}", root.display()));
                result.root_state = RootState::RootCreateFailed;
                return Ok(result);
            }
            result.root_state = RootState::RootCreated;
            if options.verify_roots {
                let verified = self
                    .provisioner
                    .verify_or_repair(&root_request, options.allow_repair)?;
                if !verified.is_success() {
                    result.notes.push(missing_note("root", &verified));
                    result.root_state = RootState::RootVerifyFailed;
                }
                result.root_verification = Some(verified);
            }
        } else if options.verify_roots {
            let verified = self
                .provisioner
                .verify_or_repair(&root_request, options.allow_repair)?;
            result.root_state = if verified.is_success() {
                RootState::RootVerified
            } else {
                result.notes.push(missing_note("root", &verified));
                RootState::RootVerifyFailed
            };
            result.root_verification = Some(verified);
        } else {
            result.root_state = RootState::ReadyExistingRoot;
        }

        if !options.provision_containers || !result.root_state.is_root_ready() {
            return Ok(result);
        }

        let base = definition.container_base(&root, options.test_mode);
        let container_request = ProvisioningRequest::new(
            &definition.project_template,
            tokens.clone(),
            Placement::Under(base),
            ExecutionMode::Apply,
        );
        let container = self.provisioner.plan(&container_request)?.target_root;
        result.container_path = Some(container.clone());

        if options.test_mode {
            let outcome = cleanup_test_artifacts_with(
                self.remover,
                &root,
                &container,
                options.allow_test_cleanup,
                &self.config.cleanup_retry,
            );
            if let Some((state, note)) = cleanup_block(&outcome, &container) {
                result.notes.push(note);
                result.root_state = state;
                return Ok(result);
            }
        }

        let applied = self.provisioner.run(&container_request)?;
        let applied_errors = applied.has_errors();
        result.project_provisioning = Some(applied);
        if applied_errors {
            result
                .notes
                .push(format!("failed to provision {}", container.display()));
            result.root_state = RootState::ProjectProvisionFailed;
            return Ok(result);
        }

        let verified = self
            .provisioner
            .verify_or_repair(&container_request, options.allow_repair)?;
        let verified_ok = verified.is_success();
        if !verified_ok {
            result.notes.push(missing_note("project container", &verified));
        }
        result.project_verification = Some(verified);
        if !verified_ok {
            result.root_state = RootState::ProjectProvisionFailed;
            return Ok(result);
        }

        match StorageRootRegistration::derive(definition, &root, &container, options.test_mode) {
            Some(registration) => {
                result.registration = Some(registration);
                result.root_state = RootState::ProjectProvisioned;
            }
            None => {
                result.notes.push(format!(
                    "cannot derive a relative path for {} under {}",
                    container.display(),
                    root.display()
                ));
                result.root_state = RootState::RegistrationFailed;
            }
        }
        Ok(result)
    }
}

fn blocked_domain(key: DomainKey, state: RootState, note: &str) -> DomainBootstrapResult {
    DomainBootstrapResult {
        domain_key: key,
        root_path: None,
        root_state: state,
        root_provisioning: None,
        root_verification: None,
        project_provisioning: None,
        project_verification: None,
        container_path: None,
        registration: None,
        notes: vec![note.to_string()],
    }
}

fn cleanup_block(outcome: &CleanupOutcome, target: &Path) -> Option<(RootState, String)> {
    match outcome {
        CleanupOutcome::NotNeeded | CleanupOutcome::Deleted => None,
        CleanupOutcome::Blocked { reason } => Some((
            RootState::BlockedTestCleanup,
            format!("test cleanup refused: {reason}"),
        )),
        CleanupOutcome::Locked {
            attempts,
            last_error,
        } => Some((
            RootState::CleanupLocked,
            format!(
                "{} still locked after {attempts} attempts: {last_error}",
                target.display()
            ),
        )),
        CleanupOutcome::Failed { error } => Some((
            RootState::CleanupFailed,
            format!("failed to remove {}: {error}", target.display()),
        )),
    }
}

fn missing_note(what: &str, summary: &ProvisioningSummary) -> String {
    format!(
        "{what} {} failed verification: missing {}",
        summary.target_root.display(),
        summary.result.missing_required.join(", ")
    )
}
