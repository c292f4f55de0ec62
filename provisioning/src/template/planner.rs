//! Flatten a template and token set into an ordered, validated plan.
//!
//! Planning is pure: it never looks at the filesystem.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use mgf_utils_path_safety::{validate_relative_path, validate_segment};

use super::model::{FolderNode, FolderTemplate, NodeKind};
use super::tokens::ProvisioningTokens;
use crate::error::{ProvisioningError, Result};

/// Only top-level folder allowed to hold `.mgf`.
pub const ADMIN_FOLDER: &str = "00_Admin";

/// Engine metadata folder name.
pub const MGF_FOLDER: &str = ".mgf";

#[allow(clippy::expect_used)]
fn top_level_regex() -> &'static Regex {
    static TOP_LEVEL_RE: OnceLock<Regex> = OnceLock::new();
    TOP_LEVEL_RE.get_or_init(|| Regex::new(r"^\d{2}_.+").expect("valid top-level regex"))
}

/// One folder or file the plan expects under the target root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub kind: NodeKind,
    /// `/`-separated, relative to the target root.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_relpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_template_key: Option<String>,
}

/// Ordered list of items under one target root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderPlan {
    pub target_root: PathBuf,
    pub items: Vec<PlanItem>,
}

impl FolderPlan {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn relative_paths(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.relative_path.as_str()).collect()
    }
}

/// Plan `template` under `base_path`: the target root is
/// `base_path/<expanded root name>`.
pub fn plan(
    template: &FolderTemplate,
    tokens: &ProvisioningTokens,
    base_path: &Path,
) -> Result<FolderPlan> {
    if !base_path.is_absolute() {
        return Err(ProvisioningError::BasePathNotAbsolute(base_path.to_path_buf()));
    }
    let root_name = expand_root(template, tokens)?;
    build(template, tokens, base_path.join(root_name))
}

/// Plan `template` directly into `target_root`. The root name is still
/// expanded and validated but not appended.
pub fn plan_into(
    template: &FolderTemplate,
    tokens: &ProvisioningTokens,
    target_root: &Path,
) -> Result<FolderPlan> {
    if !target_root.is_absolute() {
        return Err(ProvisioningError::BasePathNotAbsolute(target_root.to_path_buf()));
    }
    expand_root(template, tokens)?;
    build(template, tokens, target_root.to_path_buf())
}

fn expand_root(template: &FolderTemplate, tokens: &ProvisioningTokens) -> Result<String> {
    let root = &template.root;
    if root.kind != NodeKind::Folder {
        return Err(ProvisioningError::InvalidTemplate(format!(
            "root '{}' must be a folder",
            root.name
        )));
    }
    check_node_shape(root, &root.name)?;
    let name = tokens.expand_root_name(&root.name)?;
    validate_segment(&name)?;
    Ok(name)
}

fn build(
    template: &FolderTemplate,
    tokens: &ProvisioningTokens,
    target_root: PathBuf,
) -> Result<FolderPlan> {
    let mut walker = Walker {
        tokens,
        target_root: &target_root,
        items: Vec::new(),
        seen: HashSet::new(),
    };
    let mut segments = Vec::new();
    for child in &template.root.children {
        walker.visit(child, &mut segments, template.root.optional)?;
    }

    let mut items = walker.items;
    items.sort_by(|a, b| {
        kind_rank(a.kind)
            .cmp(&kind_rank(b.kind))
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });

    Ok(FolderPlan { target_root, items })
}

fn kind_rank(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::Folder => 0,
        NodeKind::File => 1,
    }
}

struct Walker<'a> {
    tokens: &'a ProvisioningTokens,
    target_root: &'a Path,
    items: Vec<PlanItem>,
    seen: HashSet<String>,
}

impl Walker<'_> {
    fn visit(
        &mut self,
        node: &FolderNode,
        parents: &mut Vec<String>,
        inherited_optional: bool,
    ) -> Result<()> {
        let optional = inherited_optional || node.optional;
        check_node_shape(node, &node.name)?;
        if let Some(source) = &node.source_relpath {
            validate_relative_path(source)?;
        }

        for name in self.tokens.expand_node_name(&node.name, optional)? {
            validate_segment(&name)?;
            let depth = parents.len() + 1;
            if depth == 1 && !top_level_regex().is_match(&name) {
                return Err(ProvisioningError::InvalidTopLevelName(name));
            }

            parents.push(name);
            let relative_path = parents.join("/");

            if parents.last().is_some_and(|n| n == MGF_FOLDER)
                && !(depth == 2 && parents[0] == ADMIN_FOLDER)
            {
                return Err(ProvisioningError::MisplacedAdminFolder(relative_path));
            }
            if !self.seen.insert(relative_path.to_lowercase()) {
                return Err(ProvisioningError::DuplicatePath(relative_path));
            }

            let mut absolute_path = self.target_root.to_path_buf();
            for segment in parents.iter() {
                absolute_path.push(segment);
            }
            self.items.push(PlanItem {
                kind: node.kind,
                relative_path,
                absolute_path,
                optional,
                source_relpath: node.source_relpath.clone(),
                content_template_key: node.content_template_key.clone(),
            });

            for child in &node.children {
                self.visit(child, parents, optional)?;
            }
            parents.pop();
        }
        Ok(())
    }
}

fn check_node_shape(node: &FolderNode, label: &str) -> Result<()> {
    match node.kind {
        NodeKind::Folder => {
            if node.source_relpath.is_some() || node.content_template_key.is_some() {
                return Err(ProvisioningError::InvalidTemplate(format!(
                    "folder '{label}' cannot declare sourceRelpath or contentTemplateKey"
                )));
            }
        }
        NodeKind::File => {
            if !node.children.is_empty() {
                return Err(ProvisioningError::InvalidTemplate(format!(
                    "file '{label}' cannot have children"
                )));
            }
            if node.source_relpath.is_some() && node.content_template_key.is_some() {
                return Err(ProvisioningError::InvalidTemplate(format!(
                    "file '{label}' declares both sourceRelpath and contentTemplateKey"
                )));
            }
        }
    }
    Ok(())
}
