//! Prompt templates for the knowledge oracle.
//!
//! Built-in templates are compiled in from `prompts/`. A file with the same
//! name in the configured prompts directory overrides the built-in text.
//! Placeholders are written `{{name}}`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    ExtractionSystem,
    ExtractionUser,
    DedupSystem,
    DedupUser,
    ConsolidateEntitySystem,
    ConsolidateEntityUser,
    ConsolidateRelationshipSystem,
    ConsolidateRelationshipUser,
    DocumentSummarySystem,
    DocumentSummaryUser,
    ClaimSystem,
    ClaimUser,
}

impl Prompt {
    /// Prompt file name (Markdown).
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::ExtractionSystem => "extraction_system.md",
            Prompt::ExtractionUser => "extraction_user.md",
            Prompt::DedupSystem => "dedup_system.md",
            Prompt::DedupUser => "dedup_user.md",
            Prompt::ConsolidateEntitySystem => "consolidate_entity_system.md",
            Prompt::ConsolidateEntityUser => "consolidate_entity_user.md",
            Prompt::ConsolidateRelationshipSystem => "consolidate_relationship_system.md",
            Prompt::ConsolidateRelationshipUser => "consolidate_relationship_user.md",
            Prompt::DocumentSummarySystem => "document_summary_system.md",
            Prompt::DocumentSummaryUser => "document_summary_user.md",
            Prompt::ClaimSystem => "claim_system.md",
            Prompt::ClaimUser => "claim_user.md",
        }
    }

    /// Compiled-in template text.
    pub fn builtin(&self) -> &'static str {
        match self {
            Prompt::ExtractionSystem => include_str!("../prompts/extraction_system.md"),
            Prompt::ExtractionUser => include_str!("../prompts/extraction_user.md"),
            Prompt::DedupSystem => include_str!("../prompts/dedup_system.md"),
            Prompt::DedupUser => include_str!("../prompts/dedup_user.md"),
            Prompt::ConsolidateEntitySystem => {
                include_str!("../prompts/consolidate_entity_system.md")
            }
            Prompt::ConsolidateEntityUser => include_str!("../prompts/consolidate_entity_user.md"),
            Prompt::ConsolidateRelationshipSystem => {
                include_str!("../prompts/consolidate_relationship_system.md")
            }
            Prompt::ConsolidateRelationshipUser => {
                include_str!("../prompts/consolidate_relationship_user.md")
            }
            Prompt::DocumentSummarySystem => include_str!("../prompts/document_summary_system.md"),
            Prompt::DocumentSummaryUser => include_str!("../prompts/document_summary_user.md"),
            Prompt::ClaimSystem => include_str!("../prompts/claim_system.md"),
            Prompt::ClaimUser => include_str!("../prompts/claim_user.md"),
        }
    }

    /// Load the prompt from the default prompts directory, falling back to
    /// the built-in text.
    pub fn load(&self) -> String {
        PromptLibrary::new(prompts_dir()).template(*self)
    }
}

/// Template source with an optional override directory.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    dir: Option<PathBuf>,
}

impl PromptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Built-in templates only.
    pub fn builtin() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Raw template text.
    pub fn template(&self, prompt: Prompt) -> String {
        if let Some(dir) = &self.dir {
            let path = dir.join(prompt.filename());
            if let Ok(text) = std::fs::read_to_string(&path) {
                debug!("Using prompt override {}", path.display());
                return text;
            }
        }
        prompt.builtin().to_string()
    }

    /// Template with placeholders substituted, trimmed.
    pub fn render(&self, prompt: Prompt, vars: &[(&str, &str)]) -> String {
        render(&self.template(prompt), vars).trim().to_string()
    }
}

/// Substitute `{{key}}` placeholders in a single pass. Unknown placeholders
/// are left untouched and substituted values are never re-scanned.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.iter().find(|(name, _)| *name == key) {
                    Some((_, value)) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Load a prompt file by name from the prompts directory.
pub fn load_prompt(filename: &str) -> Result<String> {
    let path = prompts_dir().join(filename);
    std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to load prompt {}: {}", filename, e)))
}

/// Path to the prompts directory.
pub fn prompts_dir() -> PathBuf {
    let candidates = [
        PathBuf::from("prompts"),
        PathBuf::from("../prompts"),
        PathBuf::from("../../prompts"),
    ];

    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("prompts")
}

/// All prompts.
pub fn list_prompts() -> Vec<Prompt> {
    vec![
        Prompt::ExtractionSystem,
        Prompt::ExtractionUser,
        Prompt::DedupSystem,
        Prompt::DedupUser,
        Prompt::ConsolidateEntitySystem,
        Prompt::ConsolidateEntityUser,
        Prompt::ConsolidateRelationshipSystem,
        Prompt::ConsolidateRelationshipUser,
        Prompt::DocumentSummarySystem,
        Prompt::DocumentSummaryUser,
        Prompt::ClaimSystem,
        Prompt::ClaimUser,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_prompt_filenames() {
        assert_eq!(Prompt::ExtractionUser.filename(), "extraction_user.md");
        assert_eq!(Prompt::DedupSystem.filename(), "dedup_system.md");
    }

    #[test]
    fn test_all_prompt_filenames_are_md() {
        for prompt in list_prompts() {
            assert!(
                prompt.filename().ends_with(".md"),
                "Prompt {:?} should have .md extension",
                prompt
            );
        }
    }

    #[test]
    fn test_builtins_are_not_empty() {
        for prompt in list_prompts() {
            assert!(!prompt.builtin().trim().is_empty(), "{:?}", prompt);
        }
    }

    #[test]
    fn test_json_prompts_mention_json() {
        for prompt in [
            Prompt::ExtractionSystem,
            Prompt::DedupSystem,
            Prompt::ConsolidateEntitySystem,
            Prompt::ConsolidateRelationshipSystem,
            Prompt::DocumentSummarySystem,
            Prompt::ClaimSystem,
        ] {
            assert!(prompt.builtin().contains("JSON"), "{:?}", prompt);
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let out = render("Hello {{ name }}, {{missing}} {{name}}", &[("name", "Ann")]);
        assert_eq!(out, "Hello Ann, {{missing}} Ann");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let out = render("{{a}}|{{b}}", &[("a", "{{b}}"), ("b", "x")]);
        assert_eq!(out, "{{b}}|x");
    }

    #[test]
    fn test_render_unterminated_placeholder() {
        assert_eq!(render("text {{open", &[("open", "x")]), "text {{open");
    }

    #[test]
    fn test_override_directory_wins() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("dedup_user.md"), "custom {{entity_list}}").unwrap();

        let library = PromptLibrary::new(dir.path());
        assert_eq!(
            library.render(Prompt::DedupUser, &[("entity_list", "- A: B")]),
            "custom - A: B"
        );
        assert_eq!(
            library.template(Prompt::DedupSystem),
            Prompt::DedupSystem.builtin()
        );
    }

    #[test]
    fn test_builtin_library_has_no_dir() {
        assert!(PromptLibrary::builtin().dir().is_none());
        assert!(PromptLibrary::builtin()
            .render(Prompt::ExtractionUser, &[("chunk", "CHUNK-TEXT")])
            .contains("CHUNK-TEXT"));
    }

    #[test]
    fn test_load_prompt_nonexistent_file() {
        let result = load_prompt("nonexistent_file_12345.md");
        assert!(result.is_err());
    }
}
