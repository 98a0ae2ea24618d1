//! Incremental knowledge-graph builder
//!
//! This library provides tools to:
//! - Split documents into token-bounded, sentence-aware chunks
//! - Extract entities and relationships per chunk with an LLM oracle
//! - Fold extractions into a per-project graph with provenance
//! - Merge duplicate entities and consolidate description fragments
//! - Persist graphs to Neo4j or JSON files, tracking ingested documents
//! - Extract questionnaire claims from documents

pub mod config;
pub mod error;
pub mod integrations;
pub mod knowledge;
pub mod metrics;
pub mod prompts;
pub mod store;

// Re-export common types
pub use config::{Config, LlmProvider};
pub use error::{Error, Result};
pub use integrations::{ClaudeClient, OpenAIClient};
pub use knowledge::{IngestionSession, KnowledgeGraph, KnowledgeOracle};
pub use prompts::{load_prompt, Prompt};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
