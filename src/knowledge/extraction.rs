//! Request/response boundary of the per-chunk extraction oracle.
//!
//! Oracle output is untrusted: it is parsed here into validated records and
//! nothing downstream sees raw JSON.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Everything the extraction oracle gets to see for one chunk.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionRequest {
    pub chunk_text: String,
    /// Snapshot of the current graph, see `KnowledgeGraph::entity_listing`.
    pub existing_entities: String,
    pub persona: String,
    /// Pretty-printed document summary JSON (or empty).
    pub document_summary: String,
    /// Tail of the previous chunk of the same document.
    pub previous_chunk_tail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    pub description: String,
}

/// Validated extraction output for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
    /// Entity records dropped for missing or malformed fields
    pub rejected_entities: usize,
    /// Relationship records dropped for missing or malformed fields
    pub rejected_relationships: usize,
}

impl ExtractionResult {
    /// Parse and validate raw oracle output.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::ExtractionFormat(format!("response is not JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::ExtractionFormat("response is not a JSON object".into()))?;

        let raw_entities = required_array(object, "entities")?;
        let raw_relationships = required_array(object, "relationships")?;

        let mut result = ExtractionResult::default();

        for record in raw_entities {
            let fields = (
                string_field(record, "name"),
                string_field(record, "type"),
                string_field(record, "description"),
            );
            match fields {
                (Some(name), Some(entity_type), Some(description))
                    if !name.is_empty() && !entity_type.is_empty() =>
                {
                    result.entities.push(ExtractedEntity {
                        name,
                        entity_type,
                        description,
                    });
                }
                _ => {
                    debug!("Rejected entity record: {}", record);
                    result.rejected_entities += 1;
                }
            }
        }

        for record in raw_relationships {
            let fields = (
                string_field(record, "source"),
                string_field(record, "target"),
                string_field(record, "description"),
            );
            match fields {
                (Some(source), Some(target), Some(description))
                    if !source.is_empty() && !target.is_empty() =>
                {
                    result.relationships.push(ExtractedRelationship {
                        source,
                        target,
                        description,
                    });
                }
                _ => {
                    debug!("Rejected relationship record: {}", record);
                    result.rejected_relationships += 1;
                }
            }
        }

        Ok(result)
    }

    /// Valid but empty: the chunk mentioned nothing.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn rejected(&self) -> usize {
        self.rejected_entities + self.rejected_relationships
    }
}

fn required_array<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a Vec<Value>> {
    match object.get(key) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(Error::ExtractionFormat(format!("`{}` is not an array", key))),
        None => Err(Error::ExtractionFormat(format!("missing `{}`", key))),
    }
}

fn string_field(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
}
