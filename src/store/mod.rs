//! Graph and document persistence.
//!
//! - `neo4j`: project graph in Neo4j
//! - `elastic`: ingested-document index in Elasticsearch
//! - `json`: local JSON files (graph per project, document ledger)
//! - `memory`: in-process stores for tests and dry runs

use async_trait::async_trait;

use crate::knowledge::KnowledgeGraph;
use crate::Result;

pub mod elastic;
pub mod json;
pub mod memory;
pub mod neo4j;

pub use elastic::ElasticDocumentStore;
pub use json::{JsonDocumentLedger, JsonGraphStore};
pub use memory::{MemoryDocumentStore, MemoryGraphStore};
pub use neo4j::Neo4jGraphStore;

/// Where project graphs live between sessions.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Current graph of a project; empty if the project is new.
    async fn fetch(&self, project_id: &str) -> Result<KnowledgeGraph>;

    /// Replace the stored project graph. All or nothing.
    async fn persist(&self, project_id: &str, graph: &KnowledgeGraph) -> Result<()>;
}

/// A document to mark as ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedDocument {
    pub document_id: String,
    pub title: String,
}

impl IngestedDocument {
    pub fn new(document_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            title: title.into(),
        }
    }
}

/// Record of documents already ingested per project.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn exists(&self, document_id: &str, project_id: &str) -> Result<bool>;

    /// Mark a batch of documents as ingested in a single write.
    async fn record_all(&self, project_id: &str, documents: &[IngestedDocument]) -> Result<()>;

    /// Mark one document as ingested.
    async fn record(&self, document_id: &str, project_id: &str, title: &str) -> Result<()> {
        self.record_all(project_id, &[IngestedDocument::new(document_id, title)])
            .await
    }
}
