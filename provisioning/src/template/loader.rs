//! Template loading and schema validation.
//!
//! Every template is validated against two draft-7 schemas before use: the
//! primary structure schema it references through `$schema`, and the shared
//! naming-rules schema that lives next to it.

use std::path::{Path, PathBuf};

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::model::FolderTemplate;
use crate::error::{ProvisioningError, Result};

/// File name of the naming-rules schema, resolved next to the primary schema.
pub const NAMING_RULES_SCHEMA_FILE: &str = "naming_rules.schema.json";

/// Directory next to a template that holds its seed files.
pub const SEEDS_DIR: &str = "seeds";

/// A parsed, schema-validated template plus its identity.
#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    pub template: FolderTemplate,
    /// `templateId` from the document, or the file stem.
    pub template_id: String,
    pub template_path: PathBuf,
    pub seeds_dir: PathBuf,
    pub schema_path: PathBuf,
    /// Lowercase hex SHA-256 of the raw template bytes.
    pub content_hash: String,
}

/// Load and validate the template at `template_path`.
///
/// `schema_override` replaces the schema the document declares.
pub fn load(template_path: &Path, schema_override: Option<&Path>) -> Result<LoadedTemplate> {
    let bytes = std::fs::read(template_path).map_err(|e| ProvisioningError::FileRead {
        path: template_path.to_path_buf(),
        source: e,
    })?;

    let document: Value =
        serde_json::from_slice(&bytes).map_err(|e| ProvisioningError::MalformedTemplate {
            path: template_path.to_path_buf(),
            reason: format!("invalid JSON: {e}"),
        })?;

    let is_empty = match &document {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_empty {
        return Err(malformed(template_path, "template document is empty"));
    }
    let Some(object) = document.as_object() else {
        return Err(malformed(template_path, "template document must be an object"));
    };
    if !object.contains_key("root") {
        return Err(malformed(template_path, "template has no root node"));
    }

    let template_dir = template_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let declared = object.get("$schema").and_then(Value::as_str);
    let schema_path = resolve_schema_path(&template_dir, declared, schema_override)?;
    let naming_path = schema_path
        .parent()
        .map(|dir| dir.join(NAMING_RULES_SCHEMA_FILE))
        .unwrap_or_else(|| PathBuf::from(NAMING_RULES_SCHEMA_FILE));

    let primary = read_schema(&schema_path)?;
    let naming = read_schema(&naming_path)?;
    validate_against(&primary, &schema_path, &document, template_path)?;
    validate_against(&naming, &naming_path, &document, template_path)?;

    let template: FolderTemplate =
        serde_json::from_value(document).map_err(|e| malformed(template_path, &e.to_string()))?;

    let template_id = template
        .template_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .or_else(|| {
            template_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "template".to_string());

    let content_hash = format!("{:x}", Sha256::digest(&bytes));

    tracing::debug!(
        template = %template_path.display(),
        template_id = %template_id,
        "Template loaded"
    );

    Ok(LoadedTemplate {
        template,
        template_id,
        template_path: template_path.to_path_buf(),
        seeds_dir: template_dir.join(SEEDS_DIR),
        schema_path,
        content_hash,
    })
}

/// Pick the schema file: override first, then `$schema` relative to the
/// template's directory. Remote references are refused.
fn resolve_schema_path(
    template_dir: &Path,
    declared: Option<&str>,
    schema_override: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = schema_override {
        return Ok(path.to_path_buf());
    }
    let Some(reference) = declared.map(str::trim).filter(|r| !r.is_empty()) else {
        return Err(ProvisioningError::SchemaNotFound(
            template_dir.join("<no $schema declared>"),
        ));
    };
    let lowered = reference.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        return Err(ProvisioningError::RemoteSchemaRejected(reference.to_string()));
    }
    let reference = reference.strip_prefix("file://").unwrap_or(reference);
    let path = Path::new(reference);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(template_dir.join(path))
    }
}

fn read_schema(path: &Path) -> Result<Value> {
    if !path.is_file() {
        return Err(ProvisioningError::SchemaNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|e| ProvisioningError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ProvisioningError::JsonDeserialize {
        path: path.to_path_buf(),
        source: e,
    })
}

fn validate_against(
    schema: &Value,
    schema_path: &Path,
    document: &Value,
    template_path: &Path,
) -> Result<()> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| ProvisioningError::SchemaValidationFailed {
            path: schema_path.to_path_buf(),
            details: format!("failed to compile schema: {e}"),
        })?;

    if let Err(errors) = compiled.validate(document) {
        let details: Vec<String> = errors
            .map(|e| format!("{e} at {}", e.instance_path))
            .collect();
        return Err(ProvisioningError::SchemaValidationFailed {
            path: template_path.to_path_buf(),
            details: details.join("\n  - "),
        });
    }
    Ok(())
}

fn malformed(path: &Path, reason: &str) -> ProvisioningError {
    ProvisioningError::MalformedTemplate {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
