//! `ingest`: build or extend a project graph from text documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

use super::{
    build_chunker, build_document_store, build_graph_store, build_oracle, discover_documents,
};
use crate::config::Config;
use crate::knowledge::{DocumentStatus, IngestionSession, RunReport};
use crate::store::{DocumentStore, GraphStore, MemoryDocumentStore, MemoryGraphStore};

#[derive(Debug, Clone, Default)]
pub struct IngestArgs {
    /// Files or directories to ingest.
    pub paths: Vec<PathBuf>,
    /// Overrides `project.id`.
    pub project: Option<String>,
    /// Overrides `pipeline.token_limit`.
    pub token_limit: Option<usize>,
    /// Run against in-memory stores; nothing is written.
    pub dry_run: bool,
    /// Write the run report as JSON.
    pub report: Option<PathBuf>,
}

pub async fn run(args: IngestArgs, mut config: Config) -> Result<RunReport> {
    if let Some(project) = &args.project {
        config.project_id = project.clone();
    }
    if let Some(limit) = args.token_limit {
        config.token_limit = limit.max(1);
    }

    let documents = discover_documents(&args.paths, &config.project_id)?;
    if documents.is_empty() {
        warn!("No documents found in {:?}", args.paths);
    }

    let oracle = build_oracle(&config)?;
    let (graphs, ledger) = if args.dry_run {
        info!("Dry run: stores are in memory");
        (
            Arc::new(MemoryGraphStore::new()) as Arc<dyn GraphStore>,
            Arc::new(MemoryDocumentStore::new()) as Arc<dyn DocumentStore>,
        )
    } else {
        (build_graph_store(&config).await?, build_document_store(&config)?)
    };

    let mut session = IngestionSession::new(oracle, graphs, ledger, config.pipeline_settings())
        .with_chunker(build_chunker(&config, None));

    let report = session
        .run(documents)
        .await
        .with_context(|| format!("ingestion for project {} failed", config.project_id))?;

    print_report(&config.project_id, &report);

    if let Some(path) = &args.report {
        write_report(path, &report)?;
        info!("Report written to {}", path.display());
    }

    Ok(report)
}

fn print_report(project_id: &str, report: &RunReport) {
    println!("Project: {} (run {})", project_id, report.run_id);
    for document in &report.summary.documents {
        let status = match &document.status {
            DocumentStatus::Ingested => "ingested".to_string(),
            DocumentStatus::Skipped => "skipped".to_string(),
            DocumentStatus::PartialFailure { failed_chunks } => {
                format!("partial ({} chunks failed)", failed_chunks.len())
            }
        };
        println!(
            "  {:<40} {:<28} +{} entities, +{} relationships",
            document.title,
            status,
            document.merge.added_entities,
            document.merge.added_relationships
        );
    }
    println!(
        "Dedup: {} groups, {} entities merged, {} skipped{}",
        report.dedup.report.groups_applied,
        report.dedup.report.entities_merged,
        report.dedup.report.skipped.len(),
        if report.dedup.oracle_error.is_some() { " (oracle failed)" } else { "" }
    );
    println!(
        "Consolidation: {} collapsed, {} consolidated, {} failed",
        report.consolidation.collapsed,
        report.consolidation.consolidated,
        report.consolidation.failures.len()
    );
    println!(
        "Graph: {} entities, {} relationships, {}",
        report.entities, report.relationships, report.state
    );
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let value = json!({
        "run_id": report.run_id.to_string(),
        "state": report.state,
        "graph_modified": report.graph_modified(),
        "entities": report.entities,
        "relationships": report.relationships,
        "merge": report.summary.merge,
        "documents": report.summary.documents,
        "dedup": {
            "groups_applied": report.dedup.report.groups_applied,
            "entities_merged": report.dedup.report.entities_merged,
            "endpoints_rewritten": report.dedup.report.endpoints_rewritten,
            "relationships_collapsed": report.dedup.report.relationships_collapsed,
            "skipped": report
                .dedup
                .report
                .skipped
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>(),
            "oracle_error": report.dedup.oracle_error.as_ref().map(|e| e.to_string()),
        },
        "consolidation": {
            "collapsed": report.consolidation.collapsed,
            "consolidated": report.consolidation.consolidated,
            "failures": report
                .consolidation
                .failures
                .iter()
                .map(|f| json!({ "item": f.item, "error": f.error.to_string() }))
                .collect::<Vec<_>>(),
        },
    });

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    std::fs::write(path, serde_json::to_string_pretty(&value)?)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(())
}
