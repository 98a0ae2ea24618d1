//! File-backed stores for running without Neo4j or Elasticsearch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DocumentStore, GraphStore, IngestedDocument};
use crate::knowledge::KnowledgeGraph;
use crate::{Error, Result};

fn file_safe(project_id: &str) -> String {
    project_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Write `bytes` next to `path` and rename over it.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// One `<project>.graph.json` per project in a directory.
#[derive(Debug, Clone)]
pub struct JsonGraphStore {
    dir: PathBuf,
}

impl JsonGraphStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{}.graph.json", file_safe(project_id)))
    }
}

#[async_trait]
impl GraphStore for JsonGraphStore {
    async fn fetch(&self, project_id: &str) -> Result<KnowledgeGraph> {
        let path = self.path_for(project_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let graph: KnowledgeGraph = serde_json::from_slice(&bytes)?;
                debug!(
                    "Loaded {} entities from {}",
                    graph.entity_count(),
                    path.display()
                );
                Ok(graph)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(KnowledgeGraph::new()),
            Err(err) => Err(Error::StoreUnavailable(format!(
                "cannot read {}: {}",
                path.display(),
                err
            ))),
        }
    }

    async fn persist(&self, project_id: &str, graph: &KnowledgeGraph) -> Result<()> {
        let path = self.path_for(project_id);
        let bytes = serde_json::to_vec_pretty(graph)?;
        write_atomic(&path, &bytes).await.map_err(|e| {
            Error::StoreUnavailable(format!("cannot write {}: {}", path.display(), e))
        })?;
        info!("Graph for {} written to {}", project_id, path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerEntry {
    document_id: String,
    project_id: String,
    title: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    documents: Vec<LedgerEntry>,
}

/// JSON file listing ingested documents.
#[derive(Debug)]
pub struct JsonDocumentLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDocumentLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Ledger> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Ledger::default()),
            Err(err) => Err(Error::StoreUnavailable(format!(
                "cannot read {}: {}",
                self.path.display(),
                err
            ))),
        }
    }
}

#[async_trait]
impl DocumentStore for JsonDocumentLedger {
    async fn exists(&self, document_id: &str, project_id: &str) -> Result<bool> {
        let ledger = self.load().await?;
        Ok(ledger
            .documents
            .iter()
            .any(|d| d.document_id == document_id && d.project_id == project_id))
    }

    async fn record_all(&self, project_id: &str, documents: &[IngestedDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut ledger = self.load().await?;
        let recorded_at = Utc::now();
        let mut added = 0;
        for document in documents {
            let known = ledger
                .documents
                .iter()
                .any(|d| d.document_id == document.document_id && d.project_id == project_id);
            if known {
                continue;
            }
            ledger.documents.push(LedgerEntry {
                document_id: document.document_id.clone(),
                project_id: project_id.to_string(),
                title: document.title.clone(),
                recorded_at,
            });
            added += 1;
        }
        if added == 0 {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&ledger)?;
        write_atomic(&self.path, &bytes).await.map_err(|e| {
            Error::StoreUnavailable(format!("cannot write {}: {}", self.path.display(), e))
        })?;
        debug!("Recorded {} documents in {}", added, self.path.display());
        Ok(())
    }
}
