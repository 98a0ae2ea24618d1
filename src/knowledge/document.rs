use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Descriptive metadata passed to the summary and claim prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            title: "UNKNOWN".to_string(),
            source_path: None,
        }
    }
}

/// Short description of what a document is, produced once per document and
/// shown alongside every chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    #[serde(default)]
    pub type_of_document: String,
    #[serde(default)]
    pub identities: String,
    #[serde(default)]
    pub temporal_details: String,
    #[serde(default)]
    pub document_summary: String,
}

impl DocumentSummary {
    /// Validate oracle output. All four fields must be strings if present and
    /// at least one must be non-empty.
    pub fn from_json(raw: &str) -> Result<Self> {
        let summary: DocumentSummary = serde_json::from_str(raw)
            .map_err(|e| Error::ExtractionFormat(format!("invalid document summary: {}", e)))?;
        if summary.is_empty() {
            return Err(Error::ExtractionFormat("document summary is empty".into()));
        }
        Ok(summary)
    }

    pub fn is_empty(&self) -> bool {
        self.type_of_document.trim().is_empty()
            && self.identities.trim().is_empty()
            && self.temporal_details.trim().is_empty()
            && self.document_summary.trim().is_empty()
    }

    /// Pretty JSON for prompts; empty string when there is no summary.
    pub fn to_prompt_json(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Source document of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub project_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub summary: Option<DocumentSummary>,
}

impl Document {
    pub fn new(
        document_id: impl Into<String>,
        project_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            project_id: project_id.into(),
            text: text.into(),
            metadata: DocumentMetadata::default(),
            summary: None,
        }
    }

    /// Load a text document. The document id is the MD5 of the file bytes,
    /// so re-ingesting an unchanged file is detected as a duplicate.
    pub fn from_path(path: &Path, project_id: &str) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let document_id = format!("{:x}", md5::compute(&bytes));
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let title = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| DocumentMetadata::default().title);

        Ok(Self {
            document_id,
            project_id: project_id.to_string(),
            text,
            metadata: DocumentMetadata {
                title,
                source_path: Some(path.display().to_string()),
            },
            summary: None,
        })
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_summary(mut self, summary: DocumentSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn metadata_json(&self) -> String {
        serde_json::to_string_pretty(&self.metadata).unwrap_or_default()
    }
}
