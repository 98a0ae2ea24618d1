//! Claim extraction against a questionnaire.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::chunker::Chunker;
use super::document::Document;
use super::oracle::KnowledgeOracle;
use super::retry::RetryPolicy;
use crate::error::{Error, Result};
use crate::store::DocumentStore;

/// One questionnaire entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub category: String,
    pub question: String,
}

/// Questions grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Questionnaire {
    pub questionnaire: Vec<Question>,
}

impl Questionnaire {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Distinct categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.questionnaire
            .iter()
            .map(|q| q.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Questions of a category as a bullet list.
    pub fn questions_for(&self, category: &str) -> String {
        self.questionnaire
            .iter()
            .filter(|q| q.category == category)
            .map(|q| format!("- {}", q.question))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Claim as returned by the oracle, before provenance is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawClaim {
    pub claim: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub quotes: Vec<String>,
    pub relevance: u8,
    #[serde(default)]
    pub relevance_explanation: String,
}

/// Claim with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claim: String,
    pub source: String,
    pub quotes: Vec<String>,
    pub relevance: u8,
    pub relevance_explanation: String,
    pub project_id: String,
    pub category: String,
    pub document_id: String,
    pub chunk_id: String,
}

/// Result of one claim extraction call: finding nothing is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimsOutcome {
    Found(Vec<RawClaim>),
    NoClaims,
}

impl ClaimsOutcome {
    /// Validate `{"claims": [...]}`. Records that do not decode are dropped;
    /// a missing or non-array `claims` is a format error.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::ExtractionFormat(format!("claims response is not JSON: {}", e)))?;
        let items = value
            .get("claims")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::ExtractionFormat("missing `claims` array".into()))?;

        let claims: Vec<RawClaim> = items
            .iter()
            .filter_map(|item| match serde_json::from_value::<RawClaim>(item.clone()) {
                Ok(claim)
                    if (1..=5).contains(&claim.relevance) && !claim.claim.trim().is_empty() =>
                {
                    Some(claim)
                }
                _ => {
                    debug!("Rejected claim record: {}", item);
                    None
                }
            })
            .collect();

        if claims.is_empty() {
            Ok(ClaimsOutcome::NoClaims)
        } else {
            Ok(ClaimsOutcome::Found(claims))
        }
    }
}

/// Input of the claims oracle.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimRequest {
    /// Document summary JSON, or metadata when there is no summary.
    pub metadata: String,
    pub text: String,
    pub questions: String,
}

#[derive(Debug)]
pub struct ClaimFailure {
    pub document_id: String,
    pub chunk_id: String,
    pub category: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct ClaimsReport {
    pub claims: Vec<Claim>,
    pub skipped_documents: Vec<String>,
    /// Claims under the relevance threshold.
    pub below_threshold: usize,
    pub failures: Vec<ClaimFailure>,
}

/// Walks unseen documents chunk by chunk and asks for claims per category.
pub struct ClaimExtractor {
    oracle: Arc<dyn KnowledgeOracle>,
    documents: Arc<dyn DocumentStore>,
    chunker: Chunker,
    retry: RetryPolicy,
    min_relevance: u8,
}

impl ClaimExtractor {
    pub fn new(
        oracle: Arc<dyn KnowledgeOracle>,
        documents: Arc<dyn DocumentStore>,
        chunker: Chunker,
        retry: RetryPolicy,
        min_relevance: u8,
    ) -> Self {
        Self {
            oracle,
            documents,
            chunker,
            retry,
            min_relevance,
        }
    }

    /// Extract claims from every document not yet in the document store.
    /// Store failures abort; oracle failures are recorded and skipped.
    pub async fn extract(
        &self,
        documents: &[Document],
        questionnaire: &Questionnaire,
    ) -> Result<ClaimsReport> {
        let mut report = ClaimsReport::default();
        let categories = questionnaire.categories();

        for document in documents {
            if self
                .documents
                .exists(&document.document_id, &document.project_id)
                .await?
            {
                info!("Skipping known document {}", document.document_id);
                report.skipped_documents.push(document.document_id.clone());
                continue;
            }

            let metadata = match &document.summary {
                Some(summary) if !summary.is_empty() => summary.to_prompt_json(),
                _ => document.metadata_json(),
            };

            for category in &categories {
                let questions = questionnaire.questions_for(category);

                for segment in self.chunker.chunk(&document.text) {
                    let request = ClaimRequest {
                        metadata: metadata.clone(),
                        text: segment.content.clone(),
                        questions: questions.clone(),
                    };

                    let outcome = self
                        .retry
                        .run("claims", || self.oracle.extract_claims(&request))
                        .await;

                    match outcome {
                        Ok(ClaimsOutcome::Found(found)) => {
                            for raw in found {
                                if raw.relevance < self.min_relevance {
                                    report.below_threshold += 1;
                                    continue;
                                }
                                report.claims.push(Claim {
                                    claim: raw.claim,
                                    source: raw.source,
                                    quotes: raw.quotes,
                                    relevance: raw.relevance,
                                    relevance_explanation: raw.relevance_explanation,
                                    project_id: document.project_id.clone(),
                                    category: category.clone(),
                                    document_id: document.document_id.clone(),
                                    chunk_id: segment.chunk_id.clone(),
                                });
                            }
                        }
                        Ok(ClaimsOutcome::NoClaims) => {}
                        Err(error) => {
                            warn!(
                                "Claim extraction failed for chunk {} ({}): {}",
                                segment.chunk_id, category, error
                            );
                            report.failures.push(ClaimFailure {
                                document_id: document.document_id.clone(),
                                chunk_id: segment.chunk_id.clone(),
                                category: category.clone(),
                                error,
                            });
                        }
                    }
                }
            }
        }

        info!(
            "Claims: {} kept, {} below threshold, {} failures",
            report.claims.len(),
            report.below_threshold,
            report.failures.len()
        );
        Ok(report)
    }
}
