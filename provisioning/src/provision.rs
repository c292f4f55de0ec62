//! One provisioning run: load, plan, execute, record.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::content::ContentTemplateRegistry;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::executor::{ExecutionContext, ExecutionMode, ExecutionResult, execute};
use crate::manifest::{ProvisioningManifest, write_manifest};
use crate::template::{self, FolderPlan, ProvisioningTokens};

const COMPONENT: &str = "provision";

/// Where a template's tree is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Target root is `base/<expanded root name>`.
    Under(PathBuf),
    /// Target root is the given path itself.
    Into(PathBuf),
}

/// Input for [`FolderProvisioner::run`].
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub template_path: PathBuf,
    pub schema_override: Option<PathBuf>,
    pub tokens: ProvisioningTokens,
    pub placement: Placement,
    pub mode: ExecutionMode,
}

impl ProvisioningRequest {
    pub fn new(
        template_path: impl Into<PathBuf>,
        tokens: ProvisioningTokens,
        placement: Placement,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            template_path: template_path.into(),
            schema_override: None,
            tokens,
            placement,
            mode,
        }
    }

    pub fn with_schema_override(mut self, schema: impl Into<PathBuf>) -> Self {
        self.schema_override = Some(schema.into());
        self
    }

    pub fn with_mode(&self, mode: ExecutionMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}

/// Caller-facing result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningSummary {
    pub template_id: String,
    pub template_path: PathBuf,
    pub mode: ExecutionMode,
    pub target_root: PathBuf,
    pub expected_items: Vec<String>,
    #[serde(flatten)]
    pub result: ExecutionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
}

impl ProvisioningSummary {
    pub fn is_success(&self) -> bool {
        self.result.is_success(self.mode)
    }

    pub fn has_errors(&self) -> bool {
        self.result.has_errors()
    }

    pub fn first_error(&self) -> Option<&str> {
        self.result.errors.first().map(String::as_str)
    }
}

/// Runs templates against the filesystem and records manifests.
pub struct FolderProvisioner<'a> {
    content: ContentTemplateRegistry,
    diagnostics: &'a dyn Diagnostics,
    manifest_enabled: bool,
}

impl<'a> FolderProvisioner<'a> {
    pub fn new(diagnostics: &'a dyn Diagnostics) -> Self {
        Self {
            content: ContentTemplateRegistry::builtin(),
            diagnostics,
            manifest_enabled: true,
        }
    }

    pub fn with_content(mut self, content: ContentTemplateRegistry) -> Self {
        self.content = content;
        self
    }

    pub fn with_manifest(mut self, enabled: bool) -> Self {
        self.manifest_enabled = enabled;
        self
    }

    /// Plan a request without executing it.
    pub fn plan(&self, request: &ProvisioningRequest) -> Result<FolderPlan> {
        let loaded = template::load(&request.template_path, request.schema_override.as_deref())?;
        plan_for(&loaded.template, &request.tokens, &request.placement)
    }

    /// Load, plan and execute. Structural problems are returned as errors;
    /// item failures end up in the summary.
    pub fn run(&self, request: &ProvisioningRequest) -> Result<ProvisioningSummary> {
        crate::measure_time!("folder_provisioning", {
            self.run_inner(request)
        })
    }

    fn run_inner(&self, request: &ProvisioningRequest) -> Result<ProvisioningSummary> {
        let loaded = template::load(&request.template_path, request.schema_override.as_deref())?;
        let plan = plan_for(&loaded.template, &request.tokens, &request.placement)?;

        let ctx = ExecutionContext {
            seeds_dir: &loaded.seeds_dir,
            content: &self.content,
            tokens: &request.tokens,
        };
        let mut result = execute(&plan, request.mode, &ctx);

        let mut manifest_path = None;
        if self.manifest_enabled && request.mode.writes() {
            let manifest =
                ProvisioningManifest::new(&loaded, &plan, &request.tokens, request.mode, &result);
            match write_manifest(&manifest) {
                Ok(path) => manifest_path = Some(path),
                Err(e) => result.warnings.push(format!("manifest not written: {e}")),
            }
        }

        self.diagnostics.info(
            COMPONENT,
            &format!(
                "{} {} at {}: {} created, {} missing, {} errors",
                request.mode,
                loaded.template_id,
                plan.target_root.display(),
                result.created_items.len(),
                result.missing_required.len(),
                result.errors.len()
            ),
        );
        for error in &result.errors {
            self.diagnostics.warn(COMPONENT, error);
        }

        Ok(ProvisioningSummary {
            template_id: loaded.template_id,
            template_path: loaded.template_path,
            mode: request.mode,
            target_root: plan.target_root.clone(),
            expected_items: plan.items.into_iter().map(|i| i.relative_path).collect(),
            result,
            manifest_path,
        })
    }

    /// Verify; on failure and when allowed, Repair and Verify again.
    ///
    /// Returns the failed Verify when repair is disallowed, the Repair
    /// summary when Repair itself reports errors, otherwise the final Verify.
    pub fn verify_or_repair(
        &self,
        request: &ProvisioningRequest,
        allow_repair: bool,
    ) -> Result<ProvisioningSummary> {
        let verify = self.run(&request.with_mode(ExecutionMode::Verify))?;
        if verify.is_success() || !allow_repair {
            return Ok(verify);
        }

        self.diagnostics.debug(
            COMPONENT,
            &format!(
                "verify failed for {}, repairing",
                verify.target_root.display()
            ),
        );
        let repair = self.run(&request.with_mode(ExecutionMode::Repair))?;
        if repair.has_errors() {
            return Ok(repair);
        }
        self.run(&request.with_mode(ExecutionMode::Verify))
    }
}

fn plan_for(
    template: &template::FolderTemplate,
    tokens: &ProvisioningTokens,
    placement: &Placement,
) -> Result<FolderPlan> {
    match placement {
        Placement::Under(base) => template::plan(template, tokens, base),
        Placement::Into(target) => template::plan_into(template, tokens, target),
    }
}
