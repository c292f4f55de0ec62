//! Named text templates for file nodes that declare `contentTemplateKey`.

use std::collections::HashMap;

use crate::template::ProvisioningTokens;

pub const PROJECT_README: &str = "project_readme";
pub const ADMIN_NOTES: &str = "admin_notes";
pub const ARCHIVE_README: &str = "archive_readme";

const PROJECT_README_TEXT: &str = "\
{PROJECT_CODE} - {PROJECT_NAME}
Client: {CLIENT_NAME}
Editors: {EDITOR_INITIALS}

This folder was provisioned automatically. Keep the numbered top-level
folders in place; add working material inside them.
";

const ADMIN_NOTES_TEXT: &str = "\
Storage root administration

Top-level folders are checked against the root integrity contract.
Anything else placed here may be moved into quarantine during repair.
";

const ARCHIVE_README_TEXT: &str = "\
{PROJECT_CODE} - {PROJECT_NAME} (archived)
Client: {CLIENT_NAME}

90_Production_Snapshot holds a copy of the production container taken at
archive time.
";

/// Registry of content templates keyed by `contentTemplateKey`.
#[derive(Debug, Clone, Default)]
pub struct ContentTemplateRegistry {
    templates: HashMap<String, String>,
}

impl ContentTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in keys.
    pub fn builtin() -> Self {
        Self::new()
            .with(PROJECT_README, PROJECT_README_TEXT)
            .with(ADMIN_NOTES, ADMIN_NOTES_TEXT)
            .with(ARCHIVE_README, ARCHIVE_README_TEXT)
    }

    /// Add or replace a template.
    pub fn with(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.templates.insert(key.into(), text.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    /// Render `key` with `tokens`, or `None` for an unknown key.
    pub fn render(&self, key: &str, tokens: &ProvisioningTokens) -> Option<String> {
        self.templates.get(key).map(|text| tokens.render_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_render() {
        let registry = ContentTemplateRegistry::builtin();
        let tokens = ProvisioningTokens::new()
            .with_project_code("MGF25-0007")
            .with_project_name("Launch")
            .with_client_name("Acme")
            .with_editor_initials(["AB"]);
        let text = registry.render(PROJECT_README, &tokens).expect("known key");
        assert!(text.starts_with("MGF25-0007 - Launch\nClient: Acme\nEditors: AB"));
        assert!(registry.render("nope", &tokens).is_none());
    }

    #[test]
    fn test_custom_key_overrides() {
        let registry =
            ContentTemplateRegistry::builtin().with(ADMIN_NOTES, "custom {PROJECT_CODE}");
        let tokens = ProvisioningTokens::new().with_project_code("X1");
        assert_eq!(registry.render(ADMIN_NOTES, &tokens).as_deref(), Some("custom X1"));
    }
}
