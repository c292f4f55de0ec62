//! Schemas, domain templates and seeds shipped with the crate.
//!
//! The files live under `provisioning/schemas` and `provisioning/templates`
//! and are compiled in so a deployment can materialise them next to its
//! configuration.

use std::path::{Path, PathBuf};

use crate::error::{ProvisioningError, Result};

pub const FOLDER_TEMPLATE_SCHEMA: &str =
    include_str!("../../schemas/folder_template.schema.json");
pub const NAMING_RULES_SCHEMA: &str = include_str!("../../schemas/naming_rules.schema.json");

const SCHEMAS: &[(&str, &str)] = &[
    ("folder_template.schema.json", FOLDER_TEMPLATE_SCHEMA),
    ("naming_rules.schema.json", NAMING_RULES_SCHEMA),
];

const TEMPLATES: &[(&str, &str)] = &[
    ("dropbox_root.json", include_str!("../../templates/dropbox_root.json")),
    ("dropbox_project.json", include_str!("../../templates/dropbox_project.json")),
    ("lucidlink_root.json", include_str!("../../templates/lucidlink_root.json")),
    ("lucidlink_project.json", include_str!("../../templates/lucidlink_project.json")),
    ("nas_root.json", include_str!("../../templates/nas_root.json")),
    ("nas_archive_project.json", include_str!("../../templates/nas_archive_project.json")),
];

const SEEDS: &[(&str, &str)] = &[
    ("project_brief.txt", include_str!("../../templates/seeds/project_brief.txt")),
    ("delivery_checklist.txt", include_str!("../../templates/seeds/delivery_checklist.txt")),
];

/// Names of the bundled domain templates.
pub fn template_names() -> impl Iterator<Item = &'static str> {
    TEMPLATES.iter().map(|(name, _)| *name)
}

/// Write both schemas into `dir`.
pub fn write_schemas(dir: &Path) -> Result<()> {
    write_all(dir, SCHEMAS)
}

/// Materialise `<dir>/schemas`, `<dir>/templates` and `<dir>/templates/seeds`.
///
/// Returns the templates directory, suitable for `EngineConfig::templates_dir`.
pub fn install(dir: &Path) -> Result<PathBuf> {
    let templates_dir = dir.join("templates");
    write_schemas(&dir.join("schemas"))?;
    write_all(&templates_dir, TEMPLATES)?;
    write_all(&templates_dir.join(super::loader::SEEDS_DIR), SEEDS)?;
    Ok(templates_dir)
}

fn write_all(dir: &Path, files: &[(&str, &str)]) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| ProvisioningError::DirectoryCreate {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for (name, content) in files {
        let path = dir.join(name);
        std::fs::write(&path, content)
            .map_err(|e| ProvisioningError::FileWrite { path, source: e })?;
    }
    Ok(())
}
