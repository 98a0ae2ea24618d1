//! Collapse multi-fragment descriptions into a single text.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::graph::KnowledgeGraph;
use super::model::Description;
use super::oracle::KnowledgeOracle;
use super::retry::RetryPolicy;
use crate::error::{Error, Result};

/// Input of the consolidation oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConsolidationRequest {
    Entity {
        name: String,
        #[serde(rename = "type")]
        entity_type: String,
        description: Vec<String>,
    },
    Relationship {
        source: String,
        target: String,
        description: Vec<String>,
    },
}

impl ConsolidationRequest {
    /// Short label for logs and failure reports.
    pub fn label(&self) -> String {
        match self {
            ConsolidationRequest::Entity {
                name, entity_type, ..
            } => format!("entity {} ({})", name, entity_type),
            ConsolidationRequest::Relationship { source, target, .. } => {
                format!("relationship {} -> {}", source, target)
            }
        }
    }

    pub fn fragments(&self) -> &[String] {
        match self {
            ConsolidationRequest::Entity { description, .. }
            | ConsolidationRequest::Relationship { description, .. } => description,
        }
    }
}

/// Validated consolidation oracle output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedDescription(pub String);

impl ConsolidatedDescription {
    /// The response must be an object with a non-blank string `description`.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            Error::ExtractionFormat(format!("consolidation response is not JSON: {}", e))
        })?;
        match value.get("description") {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                Ok(Self(text.trim().to_string()))
            }
            Some(_) => Err(Error::ExtractionFormat(
                "consolidated `description` is not a non-empty string".into(),
            )),
            None => Err(Error::ExtractionFormat("missing `description`".into())),
        }
    }
}

#[derive(Debug)]
pub struct ConsolidationFailure {
    pub item: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct ConsolidationReport {
    /// Single-fragment descriptions collapsed without an oracle call.
    pub collapsed: usize,
    /// Multi-fragment descriptions merged by the oracle.
    pub consolidated: usize,
    /// Oracle failures; the fragments were kept.
    pub failures: Vec<ConsolidationFailure>,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Entity(usize),
    Relationship(usize),
}

/// Consolidate every fragment-list description in the graph.
///
/// Up to `concurrency` oracle calls run at once. Results are applied after
/// all calls finish.
pub async fn consolidate(
    graph: &mut KnowledgeGraph,
    oracle: &dyn KnowledgeOracle,
    retry: &RetryPolicy,
    concurrency: usize,
) -> ConsolidationReport {
    let mut report = ConsolidationReport::default();
    let mut jobs: Vec<(Target, ConsolidationRequest)> = Vec::new();

    for (idx, entity) in graph.entities_mut().iter_mut().enumerate() {
        match collapse_single(&mut entity.description) {
            Some(true) => report.collapsed += 1,
            Some(false) => jobs.push((
                Target::Entity(idx),
                ConsolidationRequest::Entity {
                    name: entity.name.clone(),
                    entity_type: entity.entity_type.clone(),
                    description: entity.description.fragments(),
                },
            )),
            None => {}
        }
    }

    for (idx, relationship) in graph.relationships_mut().iter_mut().enumerate() {
        match collapse_single(&mut relationship.description) {
            Some(true) => report.collapsed += 1,
            Some(false) => jobs.push((
                Target::Relationship(idx),
                ConsolidationRequest::Relationship {
                    source: relationship.source.clone(),
                    target: relationship.target.clone(),
                    description: relationship.description.fragments(),
                },
            )),
            None => {}
        }
    }

    debug!("{} descriptions need the consolidation oracle", jobs.len());

    let results: Vec<(Target, String, Result<ConsolidatedDescription>)> = stream::iter(jobs)
        .map(|(target, request)| async move {
            let label = request.label();
            let result = retry
                .run(&format!("consolidate {}", label), || oracle.consolidate(&request))
                .await;
            (target, label, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (target, label, result) in results {
        match result {
            Ok(ConsolidatedDescription(text)) => {
                let description = match target {
                    Target::Entity(idx) => &mut graph.entities_mut()[idx].description,
                    Target::Relationship(idx) => &mut graph.relationships_mut()[idx].description,
                };
                *description = Description::Text(text);
                report.consolidated += 1;
            }
            Err(error) => {
                warn!("Keeping fragments of {}: {}", label, error);
                report.failures.push(ConsolidationFailure { item: label, error });
            }
        }
    }

    info!(
        "Consolidation: {} collapsed, {} merged by oracle, {} failed",
        report.collapsed,
        report.consolidated,
        report.failures.len()
    );

    report
}

/// `Some(true)` if a single fragment was collapsed in place, `Some(false)`
/// if the oracle is needed, `None` if there is nothing to do.
fn collapse_single(description: &mut Description) -> Option<bool> {
    match description {
        Description::Text(_) => None,
        Description::Fragments(items) => match items.len() {
            0 => None,
            1 => {
                let text = items.remove(0);
                *description = Description::Text(text);
                Some(true)
            }
            _ => Some(false),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::extraction::{ExtractionRequest, ExtractionResult};
    use crate::knowledge::dedup::DedupMapping;
    use crate::knowledge::model::{Entity, Relationship};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct JoiningOracle {
        calls: AtomicUsize,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl KnowledgeOracle for JoiningOracle {
        async fn extract(&self, _request: &ExtractionRequest) -> Result<ExtractionResult> {
            Ok(ExtractionResult::default())
        }

        async fn dedup_mapping(&self, _listing: &str) -> Result<DedupMapping> {
            Ok(DedupMapping::empty())
        }

        async fn consolidate(
            &self,
            request: &ConsolidationRequest,
        ) -> Result<ConsolidatedDescription> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let ConsolidationRequest::Entity { name, .. } = request {
                if self.fail_on.as_deref() == Some(name.as_str()) {
                    return Err(Error::Oracle("boom".into()));
                }
            }
            Ok(ConsolidatedDescription(request.fragments().join(" ")))
        }
    }

    fn entity(name: &str, fragments: &[&str]) -> Entity {
        let mut entity = Entity::new(name, "ORG");
        entity.description =
            Description::Fragments(fragments.iter().map(|s| s.to_string()).collect());
        entity
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(5), 0)
    }

    #[test]
    fn parses_consolidated_description() {
        let parsed = ConsolidatedDescription::from_json(
            r#"{"name": "A", "type": "ORG", "description": " merged "}"#,
        )
        .unwrap();
        assert_eq!(parsed.0, "merged");

        for raw in [r#"{"description": ["a", "b"]}"#, r#"{"description": ""}"#, r#"{}"#, "nope"] {
            assert!(matches!(
                ConsolidatedDescription::from_json(raw),
                Err(Error::ExtractionFormat(_))
            ));
        }
    }

    #[test]
    fn request_serializes_like_graph_records() {
        let request = ConsolidationRequest::Entity {
            name: "Acme".into(),
            entity_type: "ORG".into(),
            description: vec!["a".into(), "b".into()],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "ORG");
        assert_eq!(json["description"][1], "b");
        assert_eq!(request.label(), "entity Acme (ORG)");
    }

    #[tokio::test]
    async fn single_fragment_collapses_without_oracle() {
        let mut graph = KnowledgeGraph::from_parts(
            vec![entity("Acme", &["only one"])],
            vec![Relationship {
                source: "Acme".into(),
                target: "Acme".into(),
                description: Description::Text("already text".into()),
                references: vec![],
            }],
        );
        let oracle = JoiningOracle::default();

        let report = consolidate(&mut graph, &oracle, &policy(), 2).await;

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.collapsed, 1);
        assert_eq!(graph.entities()[0].description.as_text(), Some("only one"));
        assert_eq!(graph.relationships()[0].description.as_text(), Some("already text"));
    }

    #[tokio::test]
    async fn multi_fragment_uses_oracle_and_failures_keep_fragments() {
        let mut graph = KnowledgeGraph::from_parts(
            vec![entity("Acme", &["a", "b"]), entity("Broken", &["x", "y"])],
            vec![],
        );
        let oracle = JoiningOracle {
            fail_on: Some("Broken".into()),
            ..Default::default()
        };

        let report = consolidate(&mut graph, &oracle, &policy(), 4).await;

        assert_eq!(report.consolidated, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item, "entity Broken (ORG)");
        assert_eq!(graph.entity("Acme", "ORG").unwrap().description.as_text(), Some("a b"));
        assert_eq!(
            graph.entity("Broken", "ORG").unwrap().description.fragments(),
            vec!["x", "y"]
        );
    }
}
