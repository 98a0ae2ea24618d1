use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DocumentStore, GraphStore, IngestedDocument};
use crate::knowledge::KnowledgeGraph;
use crate::{Error, Result};

/// In-memory graph store.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graphs: Mutex<HashMap<String, KnowledgeGraph>>,
    persists: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a project graph.
    pub fn with_graph(project_id: &str, graph: KnowledgeGraph) -> Self {
        let store = Self::new();
        if let Ok(mut graphs) = store.graphs.lock() {
            graphs.insert(project_id.to_string(), graph);
        }
        store
    }

    /// Make every call fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `persist` calls.
    pub fn persist_count(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    pub fn graph(&self, project_id: &str) -> Option<KnowledgeGraph> {
        self.graphs.lock().ok()?.get(project_id).cloned()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory graph store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn fetch(&self, project_id: &str) -> Result<KnowledgeGraph> {
        self.check()?;
        let graphs = self
            .graphs
            .lock()
            .map_err(|_| Error::StoreUnavailable("graph store lock poisoned".into()))?;
        Ok(graphs.get(project_id).cloned().unwrap_or_default())
    }

    async fn persist(&self, project_id: &str, graph: &KnowledgeGraph) -> Result<()> {
        self.check()?;
        let mut graphs = self
            .graphs
            .lock()
            .map_err(|_| Error::StoreUnavailable("graph store lock poisoned".into()))?;
        graphs.insert(project_id.to_string(), graph.clone());
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    known: Mutex<HashSet<(String, String)>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents<'a>(documents: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        if let Ok(mut known) = store.known.lock() {
            for (document_id, project_id) in documents {
                known.insert((document_id.to_string(), project_id.to_string()));
            }
        }
        store
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `record_all` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.known.lock().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn exists(&self, document_id: &str, project_id: &str) -> Result<bool> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory document store offline".into()));
        }
        let known = self
            .known
            .lock()
            .map_err(|_| Error::StoreUnavailable("document store lock poisoned".into()))?;
        Ok(known.contains(&(document_id.to_string(), project_id.to_string())))
    }

    async fn record_all(&self, project_id: &str, documents: &[IngestedDocument]) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory document store offline".into()));
        }
        let mut known = self
            .known
            .lock()
            .map_err(|_| Error::StoreUnavailable("document store lock poisoned".into()))?;
        for document in documents {
            known.insert((document.document_id.clone(), project_id.to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
