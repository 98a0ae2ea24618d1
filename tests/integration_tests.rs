//! Integration tests for the knowledge_builder library
//!
//! These tests drive the public API end to end: chunking, the LLM oracle
//! over an OpenAI-compatible mock server, the session state machine and
//! the JSON stores.

mod commands;

use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;
use tempfile::tempdir;

use knowledge_builder::{
    config::{Config, DEFAULT_TOKEN_LIMIT},
    knowledge::{
        dedup::dedup_listing, Chunker, Description, Document, DocumentStatus, Entity,
        IngestionSession, KnowledgeGraph, LlmOracle, PipelineSettings, Relationship,
        SessionState, WhitespaceTokenCounter,
    },
    prompts::{list_prompts, Prompt, PromptLibrary},
    store::{DocumentStore, GraphStore, JsonDocumentLedger, JsonGraphStore},
    OpenAIClient,
};

const PROJECT: &str = "acme-audit";

/// User prompts that tag each oracle call so mocks can tell them apart.
fn write_marker_prompts(dir: &std::path::Path) {
    let prompts = [
        ("extraction_user.md", "KIND_EXTRACT CHUNK[{{chunk}}]"),
        ("dedup_user.md", "KIND_DEDUP\n{{entity_list}}"),
        ("consolidate_entity_user.md", "KIND_CONSOLIDATE_ENTITY\n{{entity}}"),
        (
            "consolidate_relationship_user.md",
            "KIND_CONSOLIDATE_RELATIONSHIP\n{{relationship}}",
        ),
        ("document_summary_system.md", "KIND_SUMMARY {{metadata}}"),
    ];
    for (name, text) in prompts {
        std::fs::write(dir.join(name), text).unwrap();
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [
            { "message": { "role": "assistant", "content": content } }
        ]
    })
}

fn body_contains(body: &[u8], needle: &str) -> bool {
    String::from_utf8_lossy(body).contains(needle)
}

fn session(
    server: &MockServer,
    prompts: &std::path::Path,
    graphs: Arc<dyn GraphStore>,
    ledger: Arc<dyn DocumentStore>,
) -> IngestionSession {
    let client = OpenAIClient::new("test-key")
        .unwrap()
        .with_base_url(&server.base_url());
    let oracle = Arc::new(LlmOracle::new(client, PromptLibrary::new(prompts)));
    IngestionSession::new(oracle, graphs, ledger, PipelineSettings::new(PROJECT))
        .with_chunker(Chunker::new(2, Arc::new(WhitespaceTokenCounter)))
}

// ============================================================================
// End-to-end session over the OpenAI client
// ============================================================================

#[tokio::test]
async fn test_session_end_to_end_with_json_stores() {
    let server = MockServer::start_async().await;
    let prompts = tempdir().unwrap();
    write_marker_prompts(prompts.path());
    let storage = tempdir().unwrap();

    let summary = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "KIND_SUMMARY"));
        then.status(200).json_body(completion(
            r#"{"type_of_document": "memo", "identities": "Acme Corp", "temporal_details": "", "document_summary": "Staffing memo"}"#,
        ));
    });
    let first_chunk = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "CHUNK[Acme hired."));
        then.status(200).json_body(completion(
            "```json\n{\"entities\": [{\"name\": \"Acme Corp\", \"type\": \"ORG\", \"description\": \"D1\"}], \"relationships\": []}\n```",
        ));
    });
    let second_chunk = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "CHUNK[Bob joined."));
        then.status(200).json_body(completion(
            r#"{"entities": [{"name": "Acme Corp", "type": "ORG", "description": "D2"}, {"name": "Bob", "type": "PERSON", "description": "Engineer"}], "relationships": [{"source": "Bob", "target": "Acme Corp", "description": "works at"}]}"#,
        ));
    });
    let dedup = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "KIND_DEDUP"));
        then.status(200)
            .json_body(completion(r#"{"duplicate_entities": []}"#));
    });
    let consolidate = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "KIND_CONSOLIDATE_ENTITY"));
        then.status(200).json_body(completion(
            r#"{"name": "Acme Corp", "type": "ORG", "description": "Company that hired Bob"}"#,
        ));
    });

    let graphs = Arc::new(JsonGraphStore::new(storage.path().join("graphs")));
    let ledger = Arc::new(JsonDocumentLedger::new(storage.path().join("documents.json")));
    let document = Document::new("doc-1", PROJECT, "Acme hired.\nBob joined.");

    let mut first = session(&server, prompts.path(), graphs.clone(), ledger.clone());
    let report = first.run(vec![document.clone()]).await.unwrap();

    summary.assert_calls(1);
    first_chunk.assert_calls(1);
    second_chunk.assert_calls(1);
    dedup.assert_calls(1);
    consolidate.assert_calls(1);

    assert_eq!(report.state, SessionState::Persisted);
    assert!(report.graph_modified());
    assert_eq!(report.entities, 2);
    assert_eq!(report.relationships, 1);
    assert_eq!(report.summary.documents[0].status, DocumentStatus::Ingested);
    assert_eq!(report.consolidation.consolidated, 1);

    let stored = graphs.fetch(PROJECT).await.unwrap();
    let acme = stored.entity("Acme Corp", "ORG").unwrap();
    assert_eq!(
        acme.description,
        Description::Text("Company that hired Bob".into())
    );
    assert_eq!(acme.references.len(), 2);
    let bob = stored.entity("Bob", "PERSON").unwrap();
    assert_eq!(bob.description, Description::Text("Engineer".into()));
    let works_at = stored.relationship("Bob", "Acme Corp").unwrap();
    assert_eq!(works_at.description, Description::Text("works at".into()));
    assert!(ledger.exists("doc-1", PROJECT).await.unwrap());

    // A second session over the same document changes nothing.
    let mut second = session(&server, prompts.path(), graphs.clone(), ledger.clone());
    let report = second.run(vec![document]).await.unwrap();

    assert_eq!(report.state, SessionState::PersistedNoOp);
    assert!(!report.graph_modified());
    assert_eq!(report.summary.documents[0].status, DocumentStatus::Skipped);
    first_chunk.assert_calls(1);
    second_chunk.assert_calls(1);
    summary.assert_calls(1);
    let unchanged = graphs.fetch(PROJECT).await.unwrap();
    assert_eq!(unchanged.entities(), stored.entities());
    assert_eq!(unchanged.relationships(), stored.relationships());
}

#[tokio::test]
async fn test_session_reports_oracle_failures_per_chunk() {
    let server = MockServer::start_async().await;
    let prompts = tempdir().unwrap();
    write_marker_prompts(prompts.path());

    server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "KIND_SUMMARY"));
        then.status(200).json_body(completion(r#"{"document_summary": "x"}"#));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "CHUNK[Acme hired."));
        then.status(200).json_body(completion(
            r#"{"entities": [{"name": "Acme Corp", "type": "ORG", "description": "D1"}], "relationships": []}"#,
        ));
    });
    let broken = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "CHUNK[Bob joined."));
        then.status(200)
            .json_body(completion("Sorry, I cannot help with that."));
    });

    let graphs = Arc::new(knowledge_builder::store::MemoryGraphStore::new());
    let ledger = Arc::new(knowledge_builder::store::MemoryDocumentStore::new());
    let mut session = session(&server, prompts.path(), graphs.clone(), ledger.clone());

    let report = session
        .run(vec![Document::new("doc-2", PROJECT, "Acme hired.\nBob joined.")])
        .await
        .unwrap();

    // One attempt plus the default two retries.
    broken.assert_calls(3);
    match &report.summary.documents[0].status {
        DocumentStatus::PartialFailure { failed_chunks } => {
            assert_eq!(failed_chunks.len(), 1);
            assert_eq!(failed_chunks[0].chunk_index, 1);
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(report.state, SessionState::Persisted);
    assert_eq!(report.entities, 1);
    assert!(!ledger.exists("doc-2", PROJECT).await.unwrap());
}

// ============================================================================
// Graph model
// ============================================================================

#[test]
fn test_graph_roundtrips_through_json() {
    let mut acme = Entity::new("Acme Corp", "ORG");
    acme.description = Description::Fragments(vec!["D1".into(), "D2".into()]);
    acme.references = vec!["c1".into(), "c2".into()];
    let mut edge = Relationship::new("Bob", "Acme Corp");
    edge.description = Description::Text("works at".into());

    let graph = KnowledgeGraph::from_parts(
        vec![acme, Entity::new("Bob", "PERSON")],
        vec![edge],
    );
    let json = serde_json::to_string(&graph).unwrap();
    assert!(json.contains("\"type\":\"ORG\""));

    let back: KnowledgeGraph = serde_json::from_str(&json).unwrap();
    assert_eq!(back.entities(), graph.entities());
    assert_eq!(back.relationships(), graph.relationships());
    assert!(back.entity("Bob", "PERSON").is_some());
}

#[test]
fn test_dedup_listing_lists_every_entity() {
    let mut acme = Entity::new("Acme Corp", "ORG");
    acme.description = Description::Fragments(vec!["D1".into(), "D2".into()]);
    let graph = KnowledgeGraph::from_parts(vec![acme, Entity::new("ACME", "ORG")], vec![]);

    let listing = dedup_listing(&graph);
    assert!(listing.contains("Acme Corp: ORG"));
    assert!(listing.contains("ACME: ORG"));
    assert!(listing.contains("D1"));
}

#[tokio::test]
async fn test_json_graph_store_missing_project_is_empty() {
    let dir = tempdir().unwrap();
    let store = JsonGraphStore::new(dir.path());
    assert!(store.fetch("nobody").await.unwrap().is_empty());
}

// ============================================================================
// Config and prompts
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = Config::defaults();
    assert_eq!(config.token_limit, DEFAULT_TOKEN_LIMIT);
    assert!(config.neo4j_uri.is_none());
    assert!(config.elastic_url.is_none());
    assert_eq!(config.ledger_path(), config.storage_dir.join("documents.json"));
}

#[test]
fn test_every_prompt_has_builtin_text() {
    for prompt in list_prompts() {
        assert!(
            !prompt.builtin().trim().is_empty(),
            "{} is empty",
            prompt.filename()
        );
    }
    assert!(Prompt::ExtractionUser.builtin().contains("{{chunk}}"));
    assert!(Prompt::DedupUser.builtin().contains("{{entity_list}}"));
}
