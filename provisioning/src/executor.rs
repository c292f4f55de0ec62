//! Execute a folder plan against the filesystem.
//!
//! Each mode is a plain function of (plan, filesystem state). Item failures
//! are collected into the result and never abort the run.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use mgf_utils_path_safety::join_relative;

use crate::content::ContentTemplateRegistry;
use crate::template::{FolderPlan, NodeKind, PlanItem, ProvisioningTokens};

/// How a plan is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Preview only.
    Plan,
    /// Check existence, never write.
    Verify,
    /// Create what is missing, never overwrite.
    Apply,
    /// Apply, and force-rewrite seeded files.
    Repair,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Plan => "plan",
            ExecutionMode::Verify => "verify",
            ExecutionMode::Apply => "apply",
            ExecutionMode::Repair => "repair",
        }
    }

    pub fn writes(&self) -> bool {
        matches!(self, ExecutionMode::Apply | ExecutionMode::Repair)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(ExecutionMode::Plan),
            "verify" => Ok(ExecutionMode::Verify),
            "apply" => Ok(ExecutionMode::Apply),
            "repair" => Ok(ExecutionMode::Repair),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

/// Outcome of one executor invocation. Relative paths throughout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub created_items: Vec<String>,
    pub missing_required: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ExecutionResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// No errors and, outside `Plan`, no missing required items.
    pub fn is_success(&self, mode: ExecutionMode) -> bool {
        self.errors.is_empty() && (mode == ExecutionMode::Plan || self.missing_required.is_empty())
    }
}

/// What the executor needs besides the plan.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub seeds_dir: &'a Path,
    pub content: &'a ContentTemplateRegistry,
    pub tokens: &'a ProvisioningTokens,
}

pub fn execute(
    plan: &FolderPlan,
    mode: ExecutionMode,
    ctx: &ExecutionContext<'_>,
) -> ExecutionResult {
    let mut result = ExecutionResult::default();
    match mode {
        ExecutionMode::Plan => return result,
        ExecutionMode::Verify => {}
        ExecutionMode::Apply | ExecutionMode::Repair => {
            if let Err(e) = std::fs::create_dir_all(&plan.target_root) {
                result.errors.push(format!(
                    "failed to create target root {}: {e}",
                    plan.target_root.display()
                ));
            }
            for item in &plan.items {
                materialize(item, mode, ctx, &mut result);
            }
        }
    }

    for item in &plan.items {
        match present_kind(&item.absolute_path) {
            Some(kind) if kind == item.kind => {}
            Some(kind) => {
                result.warnings.push(format!(
                    "{} exists as a {} but the plan expects a {}",
                    item.relative_path,
                    kind_label(kind),
                    kind_label(item.kind)
                ));
                if !item.optional {
                    result.missing_required.push(item.relative_path.clone());
                }
            }
            None if !item.optional => result.missing_required.push(item.relative_path.clone()),
            None => {}
        }
    }

    tracing::debug!(
        target_root = %plan.target_root.display(),
        mode = %mode,
        created = result.created_items.len(),
        missing = result.missing_required.len(),
        errors = result.errors.len(),
        "Plan executed"
    );
    result
}

fn materialize(
    item: &PlanItem,
    mode: ExecutionMode,
    ctx: &ExecutionContext<'_>,
    result: &mut ExecutionResult,
) {
    let path = &item.absolute_path;
    match item.kind {
        NodeKind::Folder => {
            if path.is_dir() {
                return;
            }
            if path.exists() {
                result.errors.push(format!(
                    "{}: a file is in the way of the expected folder",
                    item.relative_path
                ));
                return;
            }
            match std::fs::create_dir_all(path) {
                Ok(()) => {
                    tracing::debug!(path = %item.relative_path, "Created folder");
                    result.created_items.push(item.relative_path.clone());
                }
                Err(e) => {
                    tracing::warn!(path = %item.relative_path, "Failed to create folder: {e}");
                    result
                        .errors
                        .push(format!("{}: failed to create folder: {e}", item.relative_path));
                }
            }
        }
        NodeKind::File => {
            if path.is_dir() {
                result.errors.push(format!(
                    "{}: a folder is in the way of the expected file",
                    item.relative_path
                ));
                return;
            }
            let exists = path.exists();
            let seeded = item.source_relpath.is_some() || item.content_template_key.is_some();
            if exists && !(mode == ExecutionMode::Repair && seeded) {
                return;
            }

            let outcome = file_content(item, ctx).and_then(|content| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| format!("failed to create parent folder: {e}"))?;
                }
                if exists {
                    std::fs::write(path, &content).map_err(|e| format!("failed to overwrite: {e}"))
                } else {
                    write_new(path, &content).map_err(|e| format!("failed to write: {e}"))
                }
            });
            match outcome {
                Ok(()) => {
                    tracing::debug!(path = %item.relative_path, overwritten = exists, "Wrote file");
                    result.created_items.push(item.relative_path.clone());
                }
                Err(reason) => {
                    tracing::warn!(path = %item.relative_path, "{reason}");
                    result.errors.push(format!("{}: {reason}", item.relative_path));
                }
            }
        }
    }
}

/// Bytes for a file item: seed content, rendered content template, or empty.
fn file_content(item: &PlanItem, ctx: &ExecutionContext<'_>) -> Result<Vec<u8>, String> {
    if let Some(source) = &item.source_relpath {
        let seed = join_relative(ctx.seeds_dir, source)
            .map_err(|e| format!("unsafe seed path: {e}"))?;
        return std::fs::read(&seed)
            .map_err(|e| format!("cannot read seed {}: {e}", seed.display()));
    }
    if let Some(key) = &item.content_template_key {
        return ctx
            .content
            .render(key, ctx.tokens)
            .map(String::into_bytes)
            .ok_or_else(|| format!("unknown content template key '{key}'"));
    }
    Ok(Vec::new())
}

fn write_new(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

fn present_kind(path: &Path) -> Option<NodeKind> {
    let metadata = std::fs::metadata(path).ok()?;
    Some(if metadata.is_dir() {
        NodeKind::Folder
    } else {
        NodeKind::File
    })
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Folder => "folder",
        NodeKind::File => "file",
    }
}
