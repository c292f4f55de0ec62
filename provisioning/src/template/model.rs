//! Declarative folder-tree definitions.

use serde::{Deserialize, Serialize};

/// A complete template document as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderTemplate {
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    pub root: FolderNode,
}

/// Kind of a template node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Folder,
    File,
}

/// One node of the tree. `name` may contain placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderNode {
    pub name: String,

    #[serde(default)]
    pub kind: NodeKind,

    /// Inherited by every descendant.
    #[serde(default)]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FolderNode>,

    /// Seed file, relative to the template's `seeds/` directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_relpath: Option<String>,

    /// Key into the content template registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_template_key: Option<String>,
}

impl FolderNode {
    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Folder,
            optional: false,
            children: Vec::new(),
            source_relpath: None,
            content_template_key: None,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::File,
            ..Self::folder(name)
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_children(mut self, children: Vec<FolderNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_source(mut self, relpath: impl Into<String>) -> Self {
        self.source_relpath = Some(relpath.into());
        self
    }

    pub fn with_content_key(mut self, key: impl Into<String>) -> Self {
        self.content_template_key = Some(key.into());
        self
    }
}

impl FolderTemplate {
    pub fn new(root: FolderNode) -> Self {
        Self {
            schema: None,
            template_id: None,
            root,
        }
    }
}
