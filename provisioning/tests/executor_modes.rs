//! Plan / Verify / Apply / Repair through the provisioner, including the
//! manifest it leaves behind.

use std::path::PathBuf;

use mgf_provisioning::diagnostics::NullDiagnostics;
use mgf_provisioning::manifest::{SCHEMA_VERSION, read_manifest};
use mgf_provisioning::template::bundled;
use mgf_provisioning::{
    ExecutionMode, FolderProvisioner, Placement, ProvisioningRequest, ProvisioningTokens,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const TEMPLATE: &str = r#"{
  "$schema": "../schemas/folder_template.schema.json",
  "templateId": "edit_suite",
  "root": {
    "name": "{PROJECT_CODE}_{PROJECT_NAME}",
    "children": [
      {
        "name": "00_Admin",
        "children": [
          { "name": ".mgf", "children": [{ "name": "manifest" }] },
          { "name": "README.txt", "kind": "file", "contentTemplateKey": "project_readme" },
          { "name": "Brief.txt", "kind": "file", "sourceRelpath": "brief.txt" }
        ]
      },
      { "name": "01_Media", "children": [{ "name": "Footage" }] },
      { "name": "02_Scratch", "optional": true }
    ]
  }
}"#;

struct Fixture {
    dir: TempDir,
    template: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        bundled::write_schemas(&dir.path().join("schemas")).expect("schemas");
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(templates.join("seeds")).expect("seeds dir");
        std::fs::write(templates.join("seeds/brief.txt"), "Seed brief\n").expect("seed");
        let template = templates.join("edit_suite.json");
        std::fs::write(&template, TEMPLATE).expect("template");
        Self { dir, template }
    }

    fn request(&self, mode: ExecutionMode) -> ProvisioningRequest {
        ProvisioningRequest::new(
            &self.template,
            ProvisioningTokens::new()
                .with_project_code("MGF25-0007")
                .with_project_name("Launch")
                .with_client_name("Acme"),
            Placement::Under(self.dir.path().join("projects")),
            mode,
        )
    }

    fn target(&self) -> PathBuf {
        self.dir.path().join("projects/MGF25-0007_Launch")
    }
}

#[test]
fn plan_mode_touches_nothing() {
    let fixture = Fixture::new();
    let provisioner = FolderProvisioner::new(&NullDiagnostics);
    let summary = provisioner
        .run(&fixture.request(ExecutionMode::Plan))
        .expect("plan");
    assert!(summary.is_success());
    assert_eq!(summary.expected_items.len(), 8);
    assert!(summary.manifest_path.is_none());
    assert!(!fixture.target().exists());
}

#[test]
fn apply_is_idempotent_and_verify_agrees() {
    let fixture = Fixture::new();
    let provisioner = FolderProvisioner::new(&NullDiagnostics);

    let first = provisioner
        .run(&fixture.request(ExecutionMode::Apply))
        .expect("apply");
    assert!(first.is_success(), "{:?}", first.result.errors);
    assert_eq!(first.result.created_items.len(), 8);
    assert!(fixture.target().join("02_Scratch").is_dir());

    let second = provisioner
        .run(&fixture.request(ExecutionMode::Apply))
        .expect("apply again");
    assert!(second.result.created_items.is_empty());
    assert!(second.result.errors.is_empty());

    let verify = provisioner
        .run(&fixture.request(ExecutionMode::Verify))
        .expect("verify");
    assert!(verify.is_success());
    assert!(verify.result.missing_required.is_empty());

    let readme = std::fs::read_to_string(fixture.target().join("00_Admin/README.txt"))
        .expect("readme");
    assert!(readme.contains("MGF25-0007"), "{readme}");
}

#[test]
fn apply_keeps_edited_seed_and_repair_restores_it() {
    let fixture = Fixture::new();
    let provisioner = FolderProvisioner::new(&NullDiagnostics);
    provisioner
        .run(&fixture.request(ExecutionMode::Apply))
        .expect("apply");

    let brief = fixture.target().join("00_Admin/Brief.txt");
    std::fs::write(&brief, "edited by hand").expect("edit");

    provisioner
        .run(&fixture.request(ExecutionMode::Apply))
        .expect("apply again");
    assert_eq!(std::fs::read_to_string(&brief).expect("read"), "edited by hand");

    provisioner
        .run(&fixture.request(ExecutionMode::Repair))
        .expect("repair");
    assert_eq!(std::fs::read_to_string(&brief).expect("read"), "Seed brief\n");
}

#[test]
fn verify_reports_drift_and_repair_fixes_it() {
    let fixture = Fixture::new();
    let provisioner = FolderProvisioner::new(&NullDiagnostics);
    provisioner
        .run(&fixture.request(ExecutionMode::Apply))
        .expect("apply");
    std::fs::remove_dir_all(fixture.target().join("01_Media")).expect("remove");

    let drifted = provisioner
        .run(&fixture.request(ExecutionMode::Verify))
        .expect("verify");
    assert!(!drifted.is_success());
    assert_eq!(
        drifted.result.missing_required,
        vec!["01_Media".to_string(), "01_Media/Footage".to_string()]
    );
    assert!(!fixture.target().join("01_Media").exists());

    let repaired = provisioner
        .verify_or_repair(&fixture.request(ExecutionMode::Apply), true)
        .expect("repair");
    assert!(repaired.is_success());
    assert_eq!(repaired.mode, ExecutionMode::Verify);
    assert!(fixture.target().join("01_Media/Footage").is_dir());
}

#[test]
fn verify_without_repair_returns_failed_verify() {
    let fixture = Fixture::new();
    let provisioner = FolderProvisioner::new(&NullDiagnostics);
    let summary = provisioner
        .verify_or_repair(&fixture.request(ExecutionMode::Apply), false)
        .expect("verify");
    assert_eq!(summary.mode, ExecutionMode::Verify);
    assert!(!summary.is_success());
    assert!(!fixture.target().exists());
}

#[test]
fn manifest_records_the_last_write() {
    let fixture = Fixture::new();
    let provisioner = FolderProvisioner::new(&NullDiagnostics);
    let summary = provisioner
        .run(&fixture.request(ExecutionMode::Apply))
        .expect("apply");
    assert!(summary.manifest_path.is_some());

    let manifest = read_manifest(&fixture.target()).expect("manifest");
    assert_eq!(manifest.schema_version, SCHEMA_VERSION);
    assert_eq!(manifest.template.id, "edit_suite");
    assert_eq!(manifest.template.sha256.len(), 64);
    assert_eq!(manifest.mode, ExecutionMode::Apply);
    assert_eq!(manifest.expected_items, summary.expected_items);

    provisioner
        .run(&fixture.request(ExecutionMode::Verify))
        .expect("verify");
    let after_verify = read_manifest(&fixture.target()).expect("manifest");
    assert_eq!(after_verify.mode, ExecutionMode::Apply);
}

#[test]
fn disabled_manifest_is_not_written() {
    let fixture = Fixture::new();
    let provisioner = FolderProvisioner::new(&NullDiagnostics).with_manifest(false);
    let summary = provisioner
        .run(&fixture.request(ExecutionMode::Apply))
        .expect("apply");
    assert!(summary.manifest_path.is_none());
    assert!(read_manifest(&fixture.target()).is_err());
}
