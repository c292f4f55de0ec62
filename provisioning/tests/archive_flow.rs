//! Archive across cloud-sync, production and archival roots, including
//! resuming an interrupted run.

use std::path::PathBuf;

use mgf_provisioning::archive::{ArchiveOptions, ArchiveOrchestrator, ArchiveState};
use mgf_provisioning::bootstrap::{BootstrapOptions, BootstrapOrchestrator};
use mgf_provisioning::diagnostics::NullDiagnostics;
use mgf_provisioning::domains::{DomainDefinition, DomainKey, RootResolver};
use mgf_provisioning::project::{AuditKind, ProjectRecord, ProjectStatus};
use mgf_provisioning::template::bundled;
use mgf_provisioning::EngineConfig;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const CONTAINER: &str = "MGF25-0007_Launch";

struct Env {
    dir: TempDir,
    config: EngineConfig,
}

impl Env {
    /// Domain roots with the project already bootstrapped everywhere.
    fn bootstrapped() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = EngineConfig::default();
        config.templates_dir = bundled::install(&dir.path().join("engine")).expect("install");
        config.sandbox.runtime_dir = dir.path().join("runtime");
        for key in DomainKey::all() {
            config
                .roots
                .set(key, Some(dir.path().join("roots").join(key.as_str())));
        }
        let result = BootstrapOrchestrator::new(&config, &NullDiagnostics)
            .run(&project(ProjectStatus::ReadyToProvision), &BootstrapOptions::default())
            .expect("bootstrap");
        assert!(!result.has_errors, "{:?}", result.last_error);
        Self { dir, config }
    }

    fn root(&self, key: DomainKey) -> PathBuf {
        self.dir.path().join("roots").join(key.as_str())
    }

    fn active(&self) -> PathBuf {
        self.root(DomainKey::Dropbox).join("01_Projects_Active").join(CONTAINER)
    }

    fn staging(&self) -> PathBuf {
        self.root(DomainKey::Dropbox).join("02_Projects_ToArchive").join(CONTAINER)
    }

    fn archived(&self) -> PathBuf {
        self.root(DomainKey::Dropbox).join("03_Projects_Archived").join(CONTAINER)
    }

    fn archive_container(&self) -> PathBuf {
        self.root(DomainKey::Nas).join("01_Projects_Archive").join(CONTAINER)
    }
}

fn project(status: ProjectStatus) -> ProjectRecord {
    ProjectRecord::new("MGF25-0007", "Launch")
        .with_client("Acme")
        .with_editors(["AB"])
        .with_status(status)
}

#[test]
fn archive_moves_cloud_project_and_snapshots_production() {
    let env = Env::bootstrapped();
    let production = env.root(DomainKey::LucidLink).join("01_Projects_Active").join(CONTAINER);
    std::fs::write(production.join("03_Renders/final.mov"), "render").expect("render");

    let mut project = project(ProjectStatus::Provisioned);
    let result = ArchiveOrchestrator::new(&env.config, &NullDiagnostics)
        .run(&project, &ArchiveOptions::default())
        .expect("archive");

    assert!(!result.has_errors, "{:?}", result.last_error);
    assert_eq!(result.status_after, Some(ProjectStatus::Archived));
    let state = |key| result.domain(key).map(|d| d.state);
    assert_eq!(state(DomainKey::Dropbox), Some(ArchiveState::Archived));
    assert_eq!(state(DomainKey::LucidLink), Some(ArchiveState::SourceFound));
    assert_eq!(state(DomainKey::Nas), Some(ArchiveState::ArchiveVerified));

    assert!(!env.active().exists());
    assert!(!env.staging().exists());
    assert!(env.archived().join("00_Admin").is_dir());
    let snapshot = env.archive_container().join("90_Production_Snapshot");
    assert_eq!(
        std::fs::read_to_string(snapshot.join("03_Renders/final.mov")).expect("snapshot"),
        "render"
    );
    assert!(production.join("03_Renders/final.mov").exists());

    project.apply_archive(&result);
    assert_eq!(project.status, ProjectStatus::Archived);
    assert_eq!(project.audit_log.last().map(|e| e.kind), Some(AuditKind::Archive));
}

#[test]
fn interrupted_archive_resumes_from_staging() {
    let env = Env::bootstrapped();
    std::fs::rename(env.active(), env.staging()).expect("simulate first move");

    let orchestrator = ArchiveOrchestrator::new(&env.config, &NullDiagnostics);
    let definitions = DomainDefinition::standard(&env.config.templates_dir);
    let dropbox = definitions
        .iter()
        .find(|d| d.key == DomainKey::Dropbox)
        .expect("dropbox definition");
    let resolver = RootResolver::new(&env.config);
    let tokens = project(ProjectStatus::Provisioned).tokens();

    let inspected = orchestrator
        .inspect_cloud_sync(dropbox, &resolver, &tokens, false)
        .expect("inspect");
    assert_eq!(inspected.state, ArchiveState::ReadyToArchive);
    assert!(inspected.notes.is_empty());
    assert!(env.staging().is_dir());

    let finalized = orchestrator.finalize_cloud_sync(&inspected);
    assert_eq!(finalized.state, ArchiveState::Archived);
    assert_eq!(inspected.state, ArchiveState::ReadyToArchive);
    assert!(env.archived().is_dir());
    assert!(!env.staging().exists());
}

#[test]
fn rerun_after_archive_reports_already_archived() {
    let env = Env::bootstrapped();
    let orchestrator = ArchiveOrchestrator::new(&env.config, &NullDiagnostics);
    orchestrator
        .run(&project(ProjectStatus::Provisioned), &ArchiveOptions::default())
        .expect("first archive");

    let gated = orchestrator
        .run(&project(ProjectStatus::Archived), &ArchiveOptions::default())
        .expect("gated");
    assert!(gated.has_errors);
    assert_eq!(gated.status_after, None);
    assert!(
        gated
            .domains
            .iter()
            .all(|d| d.state == ArchiveState::BlockedStatusNotReady)
    );

    let rerun = orchestrator
        .run(&project(ProjectStatus::ArchiveFailed), &ArchiveOptions::default())
        .expect("rerun");
    assert!(!rerun.has_errors, "{:?}", rerun.last_error);
    assert_eq!(
        rerun.domain(DomainKey::Dropbox).map(|d| d.state),
        Some(ArchiveState::AlreadyArchived)
    );
    assert_eq!(rerun.status_after, Some(ProjectStatus::Archived));
}

#[test]
fn missing_production_container_still_archives() {
    let env = Env::bootstrapped();
    let production = env
        .root(DomainKey::LucidLink)
        .join("01_Projects_Active")
        .join(CONTAINER);
    std::fs::remove_dir_all(production).expect("remove production");

    let result = ArchiveOrchestrator::new(&env.config, &NullDiagnostics)
        .run(&project(ProjectStatus::Active), &ArchiveOptions::default())
        .expect("archive");
    assert!(!result.has_errors, "{:?}", result.last_error);
    assert_eq!(
        result.domain(DomainKey::LucidLink).map(|d| d.state),
        Some(ArchiveState::SourceMissing)
    );
    assert_eq!(
        result.domain(DomainKey::Nas).map(|d| d.state),
        Some(ArchiveState::SourceMissing)
    );
    assert_eq!(
        result.domain(DomainKey::Dropbox).map(|d| d.state),
        Some(ArchiveState::Archived)
    );
}

#[test]
fn missing_archival_root_leaves_project_staged() {
    let env = Env::bootstrapped();
    std::fs::remove_dir_all(env.root(DomainKey::Nas)).expect("remove nas");

    let mut project = project(ProjectStatus::Provisioned);
    let result = ArchiveOrchestrator::new(&env.config, &NullDiagnostics)
        .run(&project, &ArchiveOptions::default())
        .expect("archive");

    assert!(result.has_errors);
    assert_eq!(
        result.domain(DomainKey::Nas).map(|d| d.state),
        Some(ArchiveState::BlockedMissingRoot)
    );
    assert_eq!(
        result.domain(DomainKey::Dropbox).map(|d| d.state),
        Some(ArchiveState::ReadyToArchive)
    );
    assert!(env.staging().is_dir());
    assert!(!env.archived().exists());
    assert_eq!(result.status_after, Some(ProjectStatus::ArchiveFailed));

    project.apply_archive(&result);
    assert_eq!(project.status, ProjectStatus::ArchiveFailed);
    assert!(project.audit_log.last().is_some_and(|e| !e.succeeded));
}

#[test]
fn missing_cloud_container_is_a_hard_failure() {
    let env = Env::bootstrapped();
    std::fs::remove_dir_all(env.active()).expect("remove active");

    let result = ArchiveOrchestrator::new(&env.config, &NullDiagnostics)
        .run(&project(ProjectStatus::Provisioned), &ArchiveOptions::default())
        .expect("archive");
    assert!(result.has_errors);
    assert_eq!(
        result.domain(DomainKey::Dropbox).map(|d| d.state),
        Some(ArchiveState::ContainerMissing)
    );
    assert_eq!(result.status_after, Some(ProjectStatus::ArchiveFailed));
}

/// Replace an empty root subfolder with a plain file.
fn block_folder(path: &std::path::Path) {
    std::fs::remove_dir_all(path).expect("remove folder");
    std::fs::write(path, "in the way").expect("write blocker");
}

#[test]
fn blocked_staging_folder_reports_move_failed() {
    let env = Env::bootstrapped();
    block_folder(&env.root(DomainKey::Dropbox).join("02_Projects_ToArchive"));

    let result = ArchiveOrchestrator::new(&env.config, &NullDiagnostics)
        .run(&project(ProjectStatus::Provisioned), &ArchiveOptions::default())
        .expect("archive");

    let dropbox = result.domain(DomainKey::Dropbox).expect("dropbox");
    assert_eq!(dropbox.state, ArchiveState::MoveFailed);
    assert!(dropbox.notes[0].contains("move to staging failed"), "{:?}", dropbox.notes);
    assert!(env.active().join("00_Admin").is_dir());
    assert!(!env.archived().exists());
    assert!(result.has_errors);
    assert_eq!(result.status_after, Some(ProjectStatus::ArchiveFailed));
}

#[test]
fn blocked_archived_folder_reports_archive_move_failed() {
    let env = Env::bootstrapped();
    block_folder(&env.root(DomainKey::Dropbox).join("03_Projects_Archived"));

    let result = ArchiveOrchestrator::new(&env.config, &NullDiagnostics)
        .run(&project(ProjectStatus::Provisioned), &ArchiveOptions::default())
        .expect("archive");

    assert_eq!(
        result.domain(DomainKey::Nas).map(|d| d.state),
        Some(ArchiveState::ArchiveVerified)
    );
    let dropbox = result.domain(DomainKey::Dropbox).expect("dropbox");
    assert_eq!(dropbox.state, ArchiveState::ArchiveMoveFailed);
    assert!(env.staging().join("00_Admin").is_dir());
    assert!(result.has_errors);
    assert_eq!(result.status_after, Some(ProjectStatus::ArchiveFailed));
}

#[test]
fn snapshot_copy_failure_keeps_project_staged() {
    let env = Env::bootstrapped();
    let production = env.root(DomainKey::LucidLink).join("01_Projects_Active").join(CONTAINER);
    std::fs::write(production.join("03_Renders/final.mov"), "render").expect("render");
    let snapshot = env.archive_container().join("90_Production_Snapshot");
    std::fs::write(snapshot.join("03_Renders"), "not a folder").expect("blocker");

    let result = ArchiveOrchestrator::new(&env.config, &NullDiagnostics)
        .run(&project(ProjectStatus::Provisioned), &ArchiveOptions::default())
        .expect("archive");

    let nas = result.domain(DomainKey::Nas).expect("nas");
    assert_eq!(nas.state, ArchiveState::CopyFailed);
    assert!(nas.snapshot.as_ref().is_some_and(|r| !r.is_complete()));
    assert_eq!(
        result.domain(DomainKey::Dropbox).map(|d| d.state),
        Some(ArchiveState::ReadyToArchive)
    );
    assert!(env.staging().is_dir());
    assert!(!env.archived().exists());
    assert_eq!(result.status_after, Some(ProjectStatus::ArchiveFailed));
}
