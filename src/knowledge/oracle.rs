//! The LLM-backed oracle: extraction, dedup mapping, consolidation, document
//! summaries and claims.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::claims::{ClaimRequest, ClaimsOutcome};
use super::consolidate::{ConsolidatedDescription, ConsolidationRequest};
use super::dedup::DedupMapping;
use super::document::DocumentSummary;
use super::extraction::{ExtractionRequest, ExtractionResult};
use super::text::clean_response;
use crate::error::Result;
use crate::integrations::{CompletionClient, CompletionRequest};
use crate::metrics;
use crate::prompts::{Prompt, PromptLibrary};

/// One step of a recursive document summary.
#[derive(Debug, Clone, Default)]
pub struct SummaryRequest {
    pub metadata: String,
    pub scope: String,
    /// Summary of the parts of the document seen so far.
    pub previous: Option<DocumentSummary>,
    pub text: String,
}

/// Everything the pipeline asks of the language model.
#[async_trait]
pub trait KnowledgeOracle: Send + Sync {
    /// Entities and relationships mentioned in one chunk.
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult>;

    /// Duplicate mapping for a `dedup_listing`.
    async fn dedup_mapping(&self, listing: &str) -> Result<DedupMapping>;

    async fn consolidate(&self, request: &ConsolidationRequest) -> Result<ConsolidatedDescription>;

    async fn summarize_document(&self, _request: &SummaryRequest) -> Result<DocumentSummary> {
        Ok(DocumentSummary::default())
    }

    async fn extract_claims(&self, _request: &ClaimRequest) -> Result<ClaimsOutcome> {
        Ok(ClaimsOutcome::NoClaims)
    }
}

/// `KnowledgeOracle` over a chat completion provider.
pub struct LlmOracle<C> {
    client: C,
    prompts: PromptLibrary,
}

impl<C: CompletionClient> LlmOracle<C> {
    pub fn new(client: C, prompts: PromptLibrary) -> Self {
        Self { client, prompts }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn ask(&self, kind: &'static str, system: String, user: String) -> Result<String> {
        let started = Instant::now();
        let result = self
            .client
            .complete(&CompletionRequest::json(system, user))
            .await;
        metrics::record_oracle_call(
            kind,
            self.client.provider(),
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        let raw = result?;
        debug!("{} response: {} bytes", kind, raw.len());
        Ok(clean_response(&raw))
    }

    fn extraction_prompts(&self, request: &ExtractionRequest) -> (String, String) {
        let output_format = json!({
            "entities": [
                {
                    "name": "EntityName",
                    "type": "EntityType",
                    "description": "Comprehensive description of the entity's attributes and activities"
                }
            ],
            "relationships": [
                {
                    "source": "name of the source entity",
                    "target": "name of the target entity",
                    "description": "Why the source entity and the target entity are related"
                }
            ]
        });
        let output_format = serde_json::to_string_pretty(&output_format).unwrap_or_default();
        let system = self
            .prompts
            .render(Prompt::ExtractionSystem, &[("output_format", &output_format)]);

        let (header, instruction) = match request.previous_chunk_tail.as_deref() {
            Some(tail) if !tail.trim().is_empty() => (
                format!("## Previous chunk\n\n{}\n\n----\n", tail),
                "You are given a chunk of text, the end of the previous chunk for context, and the \
                 existing graph entities. Identify the entities and relationships in the chunk."
                    .to_string(),
            ),
            _ => (
                String::new(),
                "You are given a chunk of text and the existing graph entities. Identify the \
                 entities and relationships in the chunk."
                    .to_string(),
            ),
        };

        let user = self.prompts.render(
            Prompt::ExtractionUser,
            &[
                ("header", &header),
                ("chunk", &request.chunk_text),
                ("entities_list", &request.existing_entities),
                ("persona", &request.persona),
                ("document_summary", &request.document_summary),
                ("instruction", &instruction),
            ],
        );

        (system, user)
    }
}

#[async_trait]
impl<C: CompletionClient> KnowledgeOracle for LlmOracle<C> {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult> {
        let (system, user) = self.extraction_prompts(request);
        let raw = self.ask("extract", system, user).await?;
        let result = ExtractionResult::from_json(&raw)?;
        if result.rejected() > 0 {
            debug!(
                "Extraction rejected {} entity and {} relationship records",
                result.rejected_entities, result.rejected_relationships
            );
        }
        Ok(result)
    }

    async fn dedup_mapping(&self, listing: &str) -> Result<DedupMapping> {
        let system = self.prompts.render(Prompt::DedupSystem, &[]);
        let user = self
            .prompts
            .render(Prompt::DedupUser, &[("entity_list", listing)]);
        let raw = self.ask("dedup", system, user).await?;
        DedupMapping::from_json(&raw)
    }

    async fn consolidate(&self, request: &ConsolidationRequest) -> Result<ConsolidatedDescription> {
        let payload = serde_json::to_string_pretty(request)?;
        let (system, user) = match request {
            ConsolidationRequest::Entity { .. } => (
                self.prompts.render(Prompt::ConsolidateEntitySystem, &[]),
                self.prompts
                    .render(Prompt::ConsolidateEntityUser, &[("entity", &payload)]),
            ),
            ConsolidationRequest::Relationship { .. } => (
                self.prompts
                    .render(Prompt::ConsolidateRelationshipSystem, &[]),
                self.prompts.render(
                    Prompt::ConsolidateRelationshipUser,
                    &[("relationship", &payload)],
                ),
            ),
        };
        let raw = self.ask("consolidate", system, user).await?;
        ConsolidatedDescription::from_json(&raw)
    }

    async fn summarize_document(&self, request: &SummaryRequest) -> Result<DocumentSummary> {
        let system = self.prompts.render(
            Prompt::DocumentSummarySystem,
            &[("metadata", &request.metadata), ("scope", &request.scope)],
        );
        let user = match &request.previous {
            Some(previous) => {
                let previous = previous.to_prompt_json();
                self.prompts.render(
                    Prompt::DocumentSummaryUser,
                    &[("previous_summary", &previous), ("text", &request.text)],
                )
            }
            None => request.text.clone(),
        };
        let raw = self.ask("summary", system, user).await?;
        DocumentSummary::from_json(&raw)
    }

    async fn extract_claims(&self, request: &ClaimRequest) -> Result<ClaimsOutcome> {
        let system = self.prompts.render(Prompt::ClaimSystem, &[]);
        let user = self.prompts.render(
            Prompt::ClaimUser,
            &[
                ("metadata", &request.metadata),
                ("text", &request.text),
                ("questions", &request.questions),
            ],
        );
        let raw = self.ask("claims", system, user).await?;
        ClaimsOutcome::from_json(&raw)
    }
}
