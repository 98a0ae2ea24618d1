//! Tests for chunk command

use knowledge_builder::commands::{chunk_run, discover_documents, ChunkArgs};
use knowledge_builder::Config;
use tempfile::tempdir;

fn whitespace_config() -> Config {
    let mut config = Config::defaults();
    config.token_counter = "whitespace".into();
    config
}

#[test]
fn test_chunk_covers_every_line_once() {
    let dir = tempdir().unwrap();
    let text = "Acme Corp hired Bob.\nBob runs IT. He reports to Alice.\n\nAlice is the CTO.\n";
    std::fs::write(dir.path().join("memo.md"), text).unwrap();

    let chunks = chunk_run(
        ChunkArgs {
            paths: vec![dir.path().to_path_buf()],
            token_limit: Some(5),
            format: "json".into(),
        },
        &whitespace_config(),
    )
    .unwrap();

    assert!(chunks.len() > 1);
    let words: Vec<&str> = chunks
        .iter()
        .flat_map(|c| c.content.split_whitespace())
        .collect();
    assert_eq!(words, text.split_whitespace().collect::<Vec<_>>());
    for pair in chunks.windows(2) {
        assert!(pair[0].end_line <= pair[1].start_line);
    }
}

#[test]
fn test_chunk_ids_are_stable() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "One two three. Four five six.").unwrap();
    let args = ChunkArgs {
        paths: vec![dir.path().to_path_buf()],
        token_limit: Some(3),
        format: "text".into(),
    };

    let first = chunk_run(args.clone(), &whitespace_config()).unwrap();
    let second = chunk_run(args, &whitespace_config()).unwrap();
    let ids = |chunks: &[knowledge_builder::knowledge::Chunk]| {
        chunks.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn test_discover_documents_missing_path_fails() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(discover_documents(&[missing], "p1").is_err());
}

#[test]
fn test_same_content_same_document_id() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.md"), "Same text").unwrap();
    std::fs::write(dir.path().join("b.md"), "Same text").unwrap();

    let documents = discover_documents(&[dir.path().to_path_buf()], "p1").unwrap();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].document_id, documents[1].document_id);
    assert_ne!(documents[0].metadata.title, documents[1].metadata.title);
}
