//! Incremental knowledge-graph construction.
//!
//! Documents are chunked, each chunk goes through the extraction oracle and
//! is folded into the project graph; the session then merges duplicate
//! entities, consolidates description fragments and persists the graph if
//! anything new was added.

pub mod chunker;
pub mod claims;
pub mod consolidate;
pub mod dedup;
pub mod document;
pub mod extraction;
pub mod graph;
pub mod model;
pub mod oracle;
pub mod pipeline;
pub mod retry;
pub mod text;
pub mod tokens;

pub use chunker::{chunk_id, Chunk, Chunker, Segment};
pub use claims::{Claim, ClaimExtractor, ClaimsOutcome, ClaimsReport, Questionnaire};
pub use consolidate::{ConsolidationReport, ConsolidationRequest};
pub use dedup::{DedupMapping, DedupReport};
pub use document::{Document, DocumentMetadata, DocumentSummary};
pub use extraction::{ExtractionRequest, ExtractionResult};
pub use graph::{KnowledgeGraph, MergeOutcome};
pub use model::{Description, Entity, Relationship};
pub use oracle::{KnowledgeOracle, LlmOracle, SummaryRequest};
pub use pipeline::{
    DocumentReport, DocumentStatus, IngestionSession, PipelineSettings, RunReport, SessionState,
};
pub use retry::RetryPolicy;
pub use tokens::{
    BpeTokenCounter, HeuristicTokenCounter, TokenCounter, WhitespaceTokenCounter,
};
