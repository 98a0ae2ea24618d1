//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI. Shared wiring
//! (oracle, stores, document discovery) lives here.

pub mod chunk;
pub mod claims;
pub mod ingest;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, LlmProvider};
use crate::integrations::{ClaudeClient, CompletionClient, OpenAIClient};
use crate::knowledge::tokens::counter_from_name;
use crate::knowledge::{Chunker, Document, KnowledgeOracle, LlmOracle};
use crate::prompts::{prompts_dir, PromptLibrary};
use crate::store::{
    DocumentStore, ElasticDocumentStore, GraphStore, JsonDocumentLedger, JsonGraphStore,
    Neo4jGraphStore,
};

pub use chunk::{run as chunk_run, ChunkArgs};
pub use claims::{run as claims_run, ClaimsArgs};
pub use ingest::{run as ingest_run, IngestArgs};

/// Text formats picked up when walking directories.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "text"];

/// Expand files and directories into documents of `project_id`.
pub fn discover_documents(paths: &[PathBuf], project_id: &str) -> Result<Vec<Document>> {
    let mut files: Vec<PathBuf> = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            anyhow::bail!("no such file or directory: {}", path.display());
        }
        for entry in WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let file = entry.path();
            if file.is_file() && has_document_extension(file) {
                files.push(file.to_path_buf());
            }
        }
    }

    files.sort();
    files.dedup();

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        match Document::from_path(&file, project_id) {
            Ok(document) if document.text.trim().is_empty() => {
                warn!("Skipping empty file {}", file.display());
            }
            Ok(document) => {
                debug!("Found {} ({})", file.display(), document.document_id);
                documents.push(document);
            }
            Err(err) => warn!("Cannot read {}: {}", file.display(), err),
        }
    }

    info!("Discovered {} documents", documents.len());
    Ok(documents)
}

fn has_document_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| DOCUMENT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Chunker with the configured token counter.
pub fn build_chunker(config: &Config, token_limit: Option<usize>) -> Chunker {
    let counter = counter_from_name(&config.token_counter);
    Chunker::new(token_limit.unwrap_or(config.token_limit), counter)
}

/// LLM oracle for the configured provider.
pub fn build_oracle(config: &Config) -> Result<Arc<dyn KnowledgeOracle>> {
    let settings = config.completion_settings();

    let client: Box<dyn CompletionClient> = match config.llm_provider {
        LlmProvider::OpenAI => {
            let mut client = OpenAIClient::new(config.llm_api_key.clone())
                .context("OpenAI client")?
                .with_settings(settings);
            if let Some(url) = &config.llm_base_url {
                client = client.with_base_url(url);
            }
            Box::new(client)
        }
        LlmProvider::Anthropic => {
            let mut client = ClaudeClient::new(config.llm_api_key.clone(), &settings.model)
                .context("Anthropic client")?
                .with_settings(&settings);
            if let Some(url) = &config.llm_base_url {
                client = client.with_base_url(url);
            }
            Box::new(client)
        }
    };

    let prompts = match &config.prompts_dir {
        Some(dir) => PromptLibrary::new(dir),
        None => PromptLibrary::new(prompts_dir()),
    };

    info!(
        "Oracle: {} ({}), prompts from {}",
        client.provider(),
        config.llm_model,
        prompts
            .dir()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "built-in".to_string())
    );
    Ok(Arc::new(LlmOracle::new(client, prompts)))
}

/// Neo4j when configured, otherwise JSON files under the storage dir.
pub async fn build_graph_store(config: &Config) -> Result<Arc<dyn GraphStore>> {
    match &config.neo4j_uri {
        Some(uri) => {
            let store = Neo4jGraphStore::connect(uri, &config.neo4j_user, &config.neo4j_password)
                .await
                .with_context(|| format!("failed to connect to Neo4j at {}", uri))?;
            store
                .init_schema()
                .await
                .context("failed to create Neo4j constraints")?;
            Ok(Arc::new(store))
        }
        None => {
            let dir = config.storage_dir.join("graphs");
            info!("Graph store: {}", dir.display());
            Ok(Arc::new(JsonGraphStore::new(dir)))
        }
    }
}

/// Elasticsearch when configured, otherwise the local JSON ledger.
pub fn build_document_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match &config.elastic_url {
        Some(url) => {
            let mut store = ElasticDocumentStore::new(url, &config.elastic_index)
                .context("Elasticsearch client")?;
            if let (Some(user), Some(password)) = (&config.elastic_user, &config.elastic_password) {
                store = store.with_credentials(user, password);
            }
            info!("Document store: {}/{}", url, config.elastic_index);
            Ok(Arc::new(store))
        }
        None => {
            let path = config.ledger_path();
            info!("Document store: {}", path.display());
            Ok(Arc::new(JsonDocumentLedger::new(path)))
        }
    }
}
