//! Placeholder substitution for template node names.
//!
//! Scalar placeholders (`{PROJECT_CODE}`, `{PROJECT_NAME}`, `{CLIENT_NAME}`)
//! substitute one value. `{EDITOR_INITIALS}` fans a node out into one sibling
//! per bound editor.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::Serialize;

use crate::error::{ProvisioningError, Result};

pub const PROJECT_CODE: &str = "PROJECT_CODE";
pub const PROJECT_NAME: &str = "PROJECT_NAME";
pub const CLIENT_NAME: &str = "CLIENT_NAME";
pub const EDITOR_INITIALS: &str = "EDITOR_INITIALS";

/// Stands in for editor initials when none are bound.
pub const EDITOR_INITIALS_FALLBACK: &str = "_EDITOR_INITIALS_HERE";

#[allow(clippy::expect_used)]
fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{([A-Z_]+)\}").expect("valid placeholder regex"))
}

/// Values bound for one planning run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningTokens {
    project_code: Option<String>,
    project_name: Option<String>,
    client_name: Option<String>,
    editor_initials: Vec<String>,
}

impl ProvisioningTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project_code(mut self, value: impl Into<String>) -> Self {
        self.project_code = Some(value.into());
        self
    }

    pub fn with_project_name(mut self, value: impl Into<String>) -> Self {
        self.project_name = Some(value.into());
        self
    }

    pub fn with_client_name(mut self, value: impl Into<String>) -> Self {
        self.client_name = Some(value.into());
        self
    }

    /// Bind editor initials. Blank entries are dropped and duplicates are
    /// removed case-insensitively, keeping the first spelling.
    pub fn with_editor_initials<I, S>(mut self, initials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for raw in initials {
            let value = raw.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            if !deduped.iter().any(|v| v.eq_ignore_ascii_case(value)) {
                deduped.push(value.to_string());
            }
        }
        self.editor_initials = deduped;
        self
    }

    pub fn project_code(&self) -> Option<&str> {
        self.project_code.as_deref()
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project_name.as_deref()
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn editor_initials(&self) -> &[String] {
        &self.editor_initials
    }

    fn scalar(&self, token: &str) -> Option<&str> {
        match token {
            PROJECT_CODE => self.project_code(),
            PROJECT_NAME => self.project_name(),
            CLIENT_NAME => self.client_name(),
            _ => None,
        }
    }

    /// Expand the template's root name. It may reference the editor
    /// placeholder only while at most one editor is bound.
    pub fn expand_root_name(&self, pattern: &str) -> Result<String> {
        let names = self.expand_with(pattern, |editors| match editors {
            [] => Ok(vec![EDITOR_INITIALS_FALLBACK.to_string()]),
            [single] => Ok(vec![single.clone()]),
            _ => Err(ProvisioningError::MultiEditorRootName(pattern.to_string())),
        })?;
        names
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProvisioningError::InvalidTemplate(format!("root '{pattern}' expands to nothing"))
            })
    }

    /// Expand a non-root node name into zero or more sibling names.
    pub fn expand_node_name(&self, pattern: &str, optional: bool) -> Result<Vec<String>> {
        self.expand_with(pattern, |editors| {
            if editors.is_empty() {
                if optional {
                    Ok(Vec::new())
                } else {
                    Ok(vec![EDITOR_INITIALS_FALLBACK.to_string()])
                }
            } else {
                Ok(editors.to_vec())
            }
        })
    }

    /// Substitute tokens into free text. Unbound scalars render empty and
    /// editors are joined with ", ".
    pub fn render_text(&self, text: &str) -> String {
        placeholder_regex()
            .replace_all(text, |caps: &regex_lite::Captures| {
                let token = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                if token == EDITOR_INITIALS {
                    if self.editor_initials.is_empty() {
                        EDITOR_INITIALS_FALLBACK.to_string()
                    } else {
                        self.editor_initials.join(", ")
                    }
                } else {
                    match self.scalar(token) {
                        Some(value) => value.to_string(),
                        None if is_known_scalar(token) => String::new(),
                        None => caps
                            .get(0)
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_default(),
                    }
                }
            })
            .into_owned()
    }

    fn expand_with<F>(&self, pattern: &str, editors: F) -> Result<Vec<String>>
    where
        F: FnOnce(&[String]) -> Result<Vec<String>>,
    {
        let mut uses_editor = false;
        let mut substituted = pattern.to_string();
        for caps in placeholder_regex().captures_iter(pattern) {
            let token = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if token == EDITOR_INITIALS {
                uses_editor = true;
                continue;
            }
            if !is_known_scalar(token) {
                return Err(ProvisioningError::UnknownPlaceholder(
                    token.to_string(),
                    pattern.to_string(),
                ));
            }
            let value = self
                .scalar(token)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ProvisioningError::MissingToken(token.to_string()))?;
            substituted = substituted.replace(&format!("{{{token}}}"), value);
        }

        if !uses_editor {
            return Ok(vec![substituted]);
        }
        let placeholder = format!("{{{EDITOR_INITIALS}}}");
        Ok(editors(&self.editor_initials)?
            .into_iter()
            .map(|initials| substituted.replace(&placeholder, &initials))
            .collect())
    }
}

fn is_known_scalar(token: &str) -> bool {
    matches!(token, PROJECT_CODE | PROJECT_NAME | CLIENT_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens() -> ProvisioningTokens {
        ProvisioningTokens::new()
            .with_project_code("MGF25-0007")
            .with_project_name("Launch Film")
    }

    #[test]
    fn test_editor_initials_deduplicated_case_insensitively() {
        let t = tokens().with_editor_initials(["AB", " cd ", "ab", "", "CD"]);
        assert_eq!(t.editor_initials(), ["AB", "cd"]);
    }

    #[test]
    fn test_scalar_substitution() {
        let names = tokens()
            .expand_node_name("{PROJECT_CODE}_{PROJECT_NAME}", false)
            .expect("expand");
        assert_eq!(names, vec!["MGF25-0007_Launch Film"]);
    }

    #[test]
    fn test_fan_out_per_editor() {
        let t = tokens().with_editor_initials(["AB", "CD"]);
        let names = t.expand_node_name("01_Edits_{EDITOR_INITIALS}", true).expect("expand");
        assert_eq!(names, vec!["01_Edits_AB", "01_Edits_CD"]);
    }

    #[test]
    fn test_zero_editors_optional_drops_required_falls_back() {
        let t = tokens();
        assert!(t.expand_node_name("Edit_{EDITOR_INITIALS}", true).expect("expand").is_empty());
        assert_eq!(
            t.expand_node_name("Edit_{EDITOR_INITIALS}", false).expect("expand"),
            vec![format!("Edit_{EDITOR_INITIALS_FALLBACK}")]
        );
    }

    #[test]
    fn test_root_name_editor_rules() {
        assert_eq!(
            tokens().expand_root_name("{PROJECT_CODE}_{EDITOR_INITIALS}").expect("root"),
            format!("MGF25-0007_{EDITOR_INITIALS_FALLBACK}")
        );
        assert_eq!(
            tokens()
                .with_editor_initials(["JS"])
                .expand_root_name("{EDITOR_INITIALS}")
                .expect("root"),
            "JS"
        );
        let err = tokens()
            .with_editor_initials(["AB", "CD"])
            .expand_root_name("{PROJECT_CODE}_{EDITOR_INITIALS}")
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::MultiEditorRootName(_)));
    }

    #[test]
    fn test_missing_and_empty_scalars_are_errors() {
        let err = tokens().expand_node_name("{CLIENT_NAME}", false).unwrap_err();
        assert!(matches!(err, ProvisioningError::MissingToken(ref t) if t == CLIENT_NAME));

        let err = tokens()
            .with_client_name("   ")
            .expand_node_name("{CLIENT_NAME}", true)
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::MissingToken(_)));
    }

    #[test]
    fn test_unknown_placeholder() {
        let err = tokens().expand_node_name("{SHOOT_DATE}", false).unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::UnknownPlaceholder(ref t, _) if t == "SHOOT_DATE"
        ));
    }

    #[test]
    fn test_render_text_is_lenient() {
        let text =
            tokens().render_text("{PROJECT_CODE} for {CLIENT_NAME} by {EDITOR_INITIALS} {OTHER}");
        assert_eq!(text, format!("MGF25-0007 for  by {EDITOR_INITIALS_FALLBACK} {{OTHER}}"));
    }
}
