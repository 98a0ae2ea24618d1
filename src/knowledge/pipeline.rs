//! Ingestion session: fetch, ingest documents, deduplicate, consolidate,
//! persist.
//!
//! Chunks of one document are folded strictly in order. Documents run
//! concurrently and share the graph through a single `RwLock`; merges take
//! the write lock only after the oracle has answered.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::chunker::{Chunker, Segment};
use super::consolidate::{consolidate, ConsolidationReport};
use super::dedup::{dedup_listing, deduplicate, DedupMapping, DedupReport};
use super::document::{Document, DocumentSummary};
use super::extraction::ExtractionRequest;
use super::graph::{KnowledgeGraph, MergeOutcome};
use super::oracle::{KnowledgeOracle, SummaryRequest};
use super::retry::RetryPolicy;
use super::tokens::last_n_tokens;
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::{DocumentStore, GraphStore, IngestedDocument};

/// Knobs of one ingestion session.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub project_id: String,
    pub token_limit: usize,
    /// Share of `token_limit` carried over from the previous chunk.
    pub previous_chunk_ratio: f64,
    /// Chunk size for recursive document summaries.
    pub summary_token_limit: usize,
    pub document_concurrency: usize,
    pub consolidation_concurrency: usize,
    pub persona: String,
    pub scope: String,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            project_id: "default".to_string(),
            token_limit: 600,
            previous_chunk_ratio: 0.5,
            summary_token_limit: 4000,
            document_concurrency: 4,
            consolidation_concurrency: 8,
            persona: String::new(),
            scope: String::new(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Empty,
    Accumulating,
    Deduplicated,
    Consolidated,
    Persisted,
    PersistedNoOp,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Empty => "Empty",
            SessionState::Accumulating => "Accumulating",
            SessionState::Deduplicated => "Deduplicated",
            SessionState::Consolidated => "Consolidated",
            SessionState::Persisted => "Persisted",
            SessionState::PersistedNoOp => "PersistedNoOp",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A chunk whose extraction failed after all retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedChunk {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DocumentStatus {
    Ingested,
    /// Already in the document store, or repeated within the batch.
    Skipped,
    PartialFailure { failed_chunks: Vec<FailedChunk> },
}

impl DocumentStatus {
    fn metric_label(&self) -> &'static str {
        match self {
            DocumentStatus::Ingested => "ingested",
            DocumentStatus::Skipped => "skipped",
            DocumentStatus::PartialFailure { .. } => "partial_failure",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub document_id: String,
    pub title: String,
    pub status: DocumentStatus,
    pub chunks: usize,
    pub merge: MergeOutcome,
}

impl DocumentReport {
    fn skipped(document: &Document) -> Self {
        Self {
            document_id: document.document_id.clone(),
            title: document.metadata.title.clone(),
            status: DocumentStatus::Skipped,
            chunks: 0,
            merge: MergeOutcome::default(),
        }
    }
}

/// Ingestion totals for the session so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub merge: MergeOutcome,
    pub documents: Vec<DocumentReport>,
}

impl SessionSummary {
    /// True once any entity or relationship was created this session.
    pub fn graph_modified(&self) -> bool {
        self.merge.added_something()
    }
}

/// Dedup report plus the oracle error, if the mapping could not be had.
#[derive(Debug, Default)]
pub struct DedupStage {
    pub report: DedupReport,
    pub oracle_error: Option<Error>,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub summary: SessionSummary,
    pub dedup: DedupStage,
    pub consolidation: ConsolidationReport,
    pub state: SessionState,
    pub entities: usize,
    pub relationships: usize,
}

impl RunReport {
    pub fn graph_modified(&self) -> bool {
        self.summary.graph_modified()
    }
}

pub struct IngestionSession {
    run_id: Uuid,
    oracle: Arc<dyn KnowledgeOracle>,
    graphs: Arc<dyn GraphStore>,
    documents: Arc<dyn DocumentStore>,
    settings: PipelineSettings,
    chunker: Chunker,
    state: SessionState,
    graph: RwLock<KnowledgeGraph>,
    summary: SessionSummary,
    seen: HashSet<String>,
}

impl IngestionSession {
    pub fn new(
        oracle: Arc<dyn KnowledgeOracle>,
        graphs: Arc<dyn GraphStore>,
        documents: Arc<dyn DocumentStore>,
        settings: PipelineSettings,
    ) -> Self {
        let chunker = Chunker::with_limit(settings.token_limit);
        Self {
            run_id: Uuid::new_v4(),
            oracle,
            graphs,
            documents,
            settings,
            chunker,
            state: SessionState::Empty,
            graph: RwLock::new(KnowledgeGraph::new()),
            summary: SessionSummary::default(),
            seen: HashSet::new(),
        }
    }

    /// Replace the chunker, e.g. to use another token counter.
    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.settings.token_limit = chunker.token_limit();
        self.chunker = chunker;
        self
    }

    /// Identifies this session in logs and run reports.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    pub fn graph_modified(&self) -> bool {
        self.summary.graph_modified()
    }

    /// Copy of the current graph.
    pub async fn snapshot(&self) -> KnowledgeGraph {
        self.graph.read().await.clone()
    }

    pub fn into_graph(self) -> KnowledgeGraph {
        self.graph.into_inner()
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }

    /// Load the stored project graph.
    pub async fn begin(&mut self) -> Result<()> {
        self.expect_state(SessionState::Empty)?;
        let graph = self.graphs.fetch(&self.settings.project_id).await?;
        info!(
            "Session {} for {} starts with {} entities and {} relationships",
            self.run_id,
            self.settings.project_id,
            graph.entity_count(),
            graph.relationship_count()
        );
        *self.graph.get_mut() = graph;
        self.state = SessionState::Accumulating;
        Ok(())
    }

    /// Ingest a batch of documents. May be called repeatedly.
    ///
    /// Store failures abort the batch once every other document has finished;
    /// documents that completed are still accounted for in the summary and
    /// a failed document may be ingested again. Oracle failures are reported
    /// per chunk.
    pub async fn ingest(&mut self, documents: Vec<Document>) -> Result<Vec<DocumentReport>> {
        self.expect_state(SessionState::Accumulating)?;

        let mut reports: Vec<Option<DocumentReport>> = vec![None; documents.len()];
        let mut batch = HashSet::new();
        let mut pending = Vec::new();
        for (idx, document) in documents.into_iter().enumerate() {
            let id = &document.document_id;
            if self.seen.contains(id) || !batch.insert(id.clone()) {
                debug!("Document {} repeated in session", id);
                reports[idx] = Some(DocumentReport::skipped(&document));
            } else {
                pending.push((idx, document));
            }
        }

        let this = &*self;
        let results: Vec<(usize, Result<DocumentReport>)> = stream::iter(pending)
            .map(|(idx, document)| async move { (idx, this.ingest_document(document).await) })
            .buffer_unordered(this.settings.document_concurrency.max(1))
            .collect()
            .await;

        let mut failure = None;
        for (idx, result) in results {
            match result {
                Ok(report) => {
                    self.seen.insert(report.document_id.clone());
                    reports[idx] = Some(report);
                }
                Err(e) => {
                    warn!("Document ingestion aborted: {}", e);
                    failure.get_or_insert(e);
                }
            }
        }
        let reports: Vec<DocumentReport> = reports.into_iter().flatten().collect();

        for report in &reports {
            metrics::record_document(report.status.metric_label());
            self.summary.merge.absorb(report.merge);
        }
        self.summary.documents.extend(reports.iter().cloned());

        info!(
            "Ingested {} documents, graph modified: {}",
            reports.len(),
            self.graph_modified()
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    async fn ingest_document(&self, mut document: Document) -> Result<DocumentReport> {
        if self
            .documents
            .exists(&document.document_id, &document.project_id)
            .await?
        {
            info!("Skipping known document {}", document.metadata.title);
            return Ok(DocumentReport::skipped(&document));
        }

        if document.summary.is_none() {
            let summary = self.summarize(&document).await;
            document.summary = Some(summary);
        }
        let summary_json = document
            .summary
            .as_ref()
            .map(DocumentSummary::to_prompt_json)
            .unwrap_or_default();

        let segments: Vec<Segment> = self.chunker.chunk(&document.text).collect();
        let tail_limit =
            (self.chunker.token_limit() as f64 * self.settings.previous_chunk_ratio) as usize;

        let mut merge = MergeOutcome::default();
        let mut failed_chunks = Vec::new();
        let mut previous: Option<String> = None;

        for (chunk_index, segment) in segments.iter().enumerate() {
            let existing_entities = self.graph.read().await.entity_listing();
            let request = ExtractionRequest {
                chunk_text: segment.content.clone(),
                existing_entities,
                persona: self.settings.persona.clone(),
                document_summary: summary_json.clone(),
                previous_chunk_tail: previous
                    .as_deref()
                    .map(|text| last_n_tokens(text, tail_limit, self.chunker.counter()))
                    .filter(|tail| !tail.is_empty()),
            };

            let what = format!("extract chunk {} of {}", chunk_index, document.metadata.title);
            match self
                .settings
                .retry
                .run(&what, || self.oracle.extract(&request))
                .await
            {
                Ok(result) => {
                    if result.rejected() > 0 {
                        debug!(
                            "Chunk {}: {} malformed records dropped",
                            segment.chunk_id,
                            result.rejected()
                        );
                    }
                    let outcome = self
                        .graph
                        .write()
                        .await
                        .merge_chunk_result(&result, &segment.chunk_id);
                    metrics::record_chunk(if result.is_empty() { "empty" } else { "merged" });
                    merge.absorb(outcome);
                }
                Err(error) => {
                    warn!("Chunk {} failed: {}", segment.chunk_id, error);
                    metrics::record_chunk("failed");
                    failed_chunks.push(FailedChunk {
                        chunk_id: segment.chunk_id.clone(),
                        chunk_index,
                        reason: error.to_string(),
                    });
                }
            }

            previous = Some(segment.content.clone());
        }

        let status = if failed_chunks.is_empty() {
            DocumentStatus::Ingested
        } else {
            DocumentStatus::PartialFailure { failed_chunks }
        };
        debug!(
            "{}: {} chunks, {} new entities, {} new relationships",
            document.metadata.title,
            segments.len(),
            merge.added_entities,
            merge.added_relationships
        );

        Ok(DocumentReport {
            document_id: document.document_id,
            title: document.metadata.title,
            status,
            chunks: segments.len(),
            merge,
        })
    }

    /// Summarise the document part by part, each step seeing the summary so
    /// far. Failures give an empty summary.
    async fn summarize(&self, document: &Document) -> DocumentSummary {
        let chunker = self.chunker.resized(self.settings.summary_token_limit);
        let metadata = document.metadata_json();
        let mut summary: Option<DocumentSummary> = None;

        for segment in chunker.chunk(&document.text) {
            let request = SummaryRequest {
                metadata: metadata.clone(),
                scope: self.settings.scope.clone(),
                previous: summary.clone(),
                text: segment.content,
            };
            let what = format!("summarize {}", document.metadata.title);
            match self
                .settings
                .retry
                .run(&what, || self.oracle.summarize_document(&request))
                .await
            {
                Ok(next) => summary = Some(next),
                Err(error) => {
                    warn!(
                        "No summary for {}, continuing without: {}",
                        document.metadata.title, error
                    );
                    return DocumentSummary::default();
                }
            }
        }

        summary.unwrap_or_default()
    }

    /// Merge duplicate entities. A failed dedup oracle call leaves the graph
    /// as is.
    pub async fn deduplicate(&mut self) -> Result<DedupStage> {
        self.expect_state(SessionState::Accumulating)?;

        let graph = self.graph.get_mut();
        let mut stage = DedupStage::default();

        if graph.entity_count() > 1 {
            let listing = dedup_listing(graph);
            let oracle = self.oracle.as_ref();
            let mapping = match self
                .settings
                .retry
                .run("dedup mapping", || oracle.dedup_mapping(&listing))
                .await
            {
                Ok(mapping) => mapping,
                Err(error) => {
                    warn!("Dedup oracle failed, nothing merged: {}", error);
                    stage.oracle_error = Some(error);
                    DedupMapping::empty()
                }
            };
            stage.report = deduplicate(graph, &mapping);
        }

        self.state = SessionState::Deduplicated;
        Ok(stage)
    }

    pub async fn consolidate(&mut self) -> Result<ConsolidationReport> {
        self.expect_state(SessionState::Deduplicated)?;
        let report = consolidate(
            self.graph.get_mut(),
            self.oracle.as_ref(),
            &self.settings.retry,
            self.settings.consolidation_concurrency,
        )
        .await;
        self.state = SessionState::Consolidated;
        Ok(report)
    }

    /// Write the graph back if anything was added, then record fully
    /// ingested documents so they are skipped next time.
    pub async fn persist(&mut self) -> Result<SessionState> {
        self.expect_state(SessionState::Consolidated)?;

        let next = if self.graph_modified() {
            self.graphs
                .persist(&self.settings.project_id, self.graph.get_mut())
                .await?;
            SessionState::Persisted
        } else {
            info!(
                "No new entities or relationships for {}, graph not written",
                self.settings.project_id
            );
            SessionState::PersistedNoOp
        };

        let ingested: Vec<IngestedDocument> = self
            .summary
            .documents
            .iter()
            .filter(|report| report.status == DocumentStatus::Ingested)
            .map(|report| IngestedDocument::new(report.document_id.clone(), report.title.clone()))
            .collect();
        if !ingested.is_empty() {
            self.documents
                .record_all(&self.settings.project_id, &ingested)
                .await?;
        }

        self.state = next;
        Ok(next)
    }

    /// The whole session in one call.
    pub async fn run(&mut self, documents: Vec<Document>) -> Result<RunReport> {
        self.begin().await?;
        self.ingest(documents).await?;
        let dedup = self.deduplicate().await?;
        let consolidation = self.consolidate().await?;
        let state = self.persist().await?;

        let graph = self.graph.get_mut();
        Ok(RunReport {
            run_id: self.run_id,
            summary: self.summary.clone(),
            dedup,
            consolidation,
            state,
            entities: graph.entity_count(),
            relationships: graph.relationship_count(),
        })
    }
}
