//! `claims`: answer a questionnaire from unseen documents.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use super::{build_chunker, build_document_store, build_oracle, discover_documents};
use crate::config::Config;
use crate::knowledge::{ClaimExtractor, ClaimsReport, Questionnaire};

#[derive(Debug, Clone, Default)]
pub struct ClaimsArgs {
    pub paths: Vec<PathBuf>,
    /// JSON file `{"questionnaire": [{"category", "question"}]}`.
    pub questionnaire: PathBuf,
    pub project: Option<String>,
    pub min_relevance: Option<u8>,
    /// Where to write the claims; stdout when absent.
    pub output: Option<PathBuf>,
}

pub async fn run(args: ClaimsArgs, mut config: Config) -> Result<ClaimsReport> {
    if let Some(project) = &args.project {
        config.project_id = project.clone();
    }

    let raw = std::fs::read_to_string(&args.questionnaire)
        .with_context(|| format!("failed to read {}", args.questionnaire.display()))?;
    let questionnaire = Questionnaire::from_json(&raw).context("invalid questionnaire")?;
    info!(
        "Questionnaire: {} questions in {} categories",
        questionnaire.questionnaire.len(),
        questionnaire.categories().len()
    );

    let documents = discover_documents(&args.paths, &config.project_id)?;
    let extractor = ClaimExtractor::new(
        build_oracle(&config)?,
        build_document_store(&config)?,
        build_chunker(&config, None),
        config.retry_policy(),
        args.min_relevance.unwrap_or(config.min_claim_relevance),
    );

    let report = extractor
        .extract(&documents, &questionnaire)
        .await
        .context("claim extraction failed")?;

    let json = serde_json::to_string_pretty(&report.claims)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{} claims written to {}", report.claims.len(), path.display());
        }
        None => println!("{}", json),
    }

    if !report.failures.is_empty() {
        eprintln!("{} chunk/category calls failed", report.failures.len());
    }

    Ok(report)
}
