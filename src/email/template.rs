use anyhow::{Context, Result};
use log::{debug, info};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::email::kind::EmailKind;

/// HTML template with literal `[PLACEHOLDER]` tokens.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
}

impl Template {
    /// Loads the template for `kind` from `dir`. A missing file is fatal.
    pub fn load(dir: impl AsRef<Path>, kind: EmailKind) -> Result<Self> {
        let path = dir.as_ref().join(kind.template_file());
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Unable to read {} template at {}", kind, path.display()))?;

        info!("📄 Loaded {} template from {} ({} bytes)", kind, path.display(), source.len());

        Ok(Template { source })
    }

    pub fn from_source(source: impl Into<String>) -> Self {
        Template {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Replaces every occurrence of each placeholder, in order. No escaping.
    pub fn render<S: AsRef<str>>(&self, replacements: &[(&str, S)]) -> String {
        let mut content = self.source.clone();
        for (placeholder, value) in replacements {
            content = content.replace(placeholder, value.as_ref());
        }
        debug!("Rendered template: {} -> {} bytes", self.source.len(), content.len());
        content
    }
}

/// Bracketed upper-case tokens still present after rendering.
pub fn unresolved_placeholders(rendered: &str) -> Vec<String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| Regex::new(r"\[[A-Z][A-Z0-9 .]*\]").unwrap());

    let mut found: Vec<String> = re
        .find_iter(rendered)
        .map(|m| m.as_str().to_string())
        .collect();
    found.sort();
    found.dedup();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_all_occurrences() {
        let template = Template::from_source("<p>Hi [STUDENT NAME]!</p><p>[STUDENT NAME] / [STUDENT ID NO.]</p>");

        let html = template.render(&[("[STUDENT NAME]", "Ana"), ("[STUDENT ID NO.]", "21-1-00001")]);

        assert_eq!(html, "<p>Hi Ana!</p><p>Ana / 21-1-00001</p>");
    }

    #[test]
    fn test_render_is_literal() {
        let template = Template::from_source("Link: [SPECIAL ELECTION LINK]");

        let html = template.render(&[("[SPECIAL ELECTION LINK]", "https://x.example/?a=1&b=$1")]);

        assert_eq!(html, "Link: https://x.example/?a=1&b=$1");
    }

    #[test]
    fn test_unresolved_placeholders() {
        let leftovers = unresolved_placeholders("Hi Ana, vote at [PRECINCT LOCATION] on [ELECTION DATE] [ELECTION DATE] [x]");

        assert_eq!(leftovers, vec!["[ELECTION DATE]".to_string(), "[PRECINCT LOCATION]".to_string()]);
        assert!(unresolved_placeholders("<p>nothing left</p>").is_empty());
    }

    #[test]
    fn test_missing_template_is_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = Template::load(dir.path(), EmailKind::Blast).unwrap_err();

        assert!(err.to_string().contains("email_blast.html"));
    }

    #[test]
    fn test_load_existing_template() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("email_reapply_template.html"), "<p>[REAPPLY REASON]</p>").unwrap();

        let template = Template::load(dir.path(), EmailKind::Reapply).unwrap();

        assert_eq!(template.source(), "<p>[REAPPLY REASON]</p>");
    }
}
