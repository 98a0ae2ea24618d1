//! Tests for ingest command

use httpmock::prelude::*;
use tempfile::{tempdir, TempDir};

use knowledge_builder::commands::{ingest_run, IngestArgs};
use knowledge_builder::knowledge::{DocumentStatus, SessionState};
use knowledge_builder::Config;

use crate::{body_contains, completion, write_marker_prompts};

struct Fixture {
    server: MockServer,
    prompts: TempDir,
    storage: TempDir,
    docs: TempDir,
}

async fn fixture() -> Fixture {
    let server = MockServer::start_async().await;
    let prompts = tempdir().unwrap();
    write_marker_prompts(prompts.path());

    server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "KIND_SUMMARY"));
        then.status(200)
            .json_body(completion(r#"{"document_summary": "Staffing memo"}"#));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "KIND_EXTRACT"));
        then.status(200).json_body(completion(
            r#"{"entities": [{"name": "Acme Corp", "type": "ORG", "description": "Employer"}, {"name": "Bob", "type": "PERSON", "description": "Engineer"}], "relationships": [{"source": "Bob", "target": "Acme Corp", "description": "works at"}]}"#,
        ));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .is_true(|req| body_contains(req.body().as_ref(), "KIND_DEDUP"));
        then.status(200)
            .json_body(completion(r#"{"duplicate_entities": []}"#));
    });

    let docs = tempdir().unwrap();
    std::fs::write(docs.path().join("memo.md"), "Acme Corp hired Bob.\n").unwrap();

    Fixture {
        server,
        prompts,
        storage: tempdir().unwrap(),
        docs,
    }
}

impl Fixture {
    fn config(&self) -> Config {
        let mut config = Config::defaults();
        config.project_id = "cli-project".into();
        config.token_counter = "whitespace".into();
        config.llm_api_key = "test-key".into();
        config.llm_base_url = Some(self.server.base_url());
        config.prompts_dir = Some(self.prompts.path().to_path_buf());
        config.storage_dir = self.storage.path().to_path_buf();
        config.max_retries = 0;
        config
    }

    fn args(&self) -> IngestArgs {
        IngestArgs {
            paths: vec![self.docs.path().to_path_buf()],
            ..IngestArgs::default()
        }
    }
}

#[tokio::test]
async fn test_ingest_persists_and_skips_known_documents() {
    let fixture = fixture().await;
    let report_path = fixture.storage.path().join("reports/run.json");

    let mut args = fixture.args();
    args.report = Some(report_path.clone());
    let report = ingest_run(args, fixture.config()).await.unwrap();

    assert_eq!(report.state, SessionState::Persisted);
    assert_eq!(report.entities, 2);
    assert_eq!(report.relationships, 1);
    assert!(fixture
        .storage
        .path()
        .join("graphs/cli-project.graph.json")
        .exists());
    assert!(fixture.storage.path().join("documents.json").exists());

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(written["state"], "Persisted");
    assert_eq!(written["graph_modified"], true);
    assert_eq!(written["entities"], 2);
    assert!(written["run_id"].as_str().is_some());

    let again = ingest_run(fixture.args(), fixture.config()).await.unwrap();
    assert_eq!(again.state, SessionState::PersistedNoOp);
    assert_eq!(again.summary.documents[0].status, DocumentStatus::Skipped);
}

#[tokio::test]
async fn test_ingest_dry_run_writes_nothing() {
    let fixture = fixture().await;
    let mut args = fixture.args();
    args.dry_run = true;

    let report = ingest_run(args, fixture.config()).await.unwrap();

    assert_eq!(report.state, SessionState::Persisted);
    assert_eq!(report.entities, 2);
    assert!(!fixture.storage.path().join("graphs").exists());
    assert!(!fixture.storage.path().join("documents.json").exists());
}

#[tokio::test]
async fn test_ingest_project_override() {
    let fixture = fixture().await;
    let mut args = fixture.args();
    args.project = Some("other".into());

    ingest_run(args, fixture.config()).await.unwrap();

    assert!(fixture
        .storage
        .path()
        .join("graphs/other.graph.json")
        .exists());
}
