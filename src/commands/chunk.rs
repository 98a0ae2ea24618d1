//! `chunk`: show how documents would be split, without calling the oracle.

use std::path::PathBuf;

use anyhow::{bail, Result};

use super::{build_chunker, discover_documents};
use crate::config::Config;
use crate::knowledge::Chunk;

#[derive(Debug, Clone, Default)]
pub struct ChunkArgs {
    pub paths: Vec<PathBuf>,
    pub token_limit: Option<usize>,
    /// `text` or `json`
    pub format: String,
}

pub fn run(args: ChunkArgs, config: &Config) -> Result<Vec<Chunk>> {
    let chunker = build_chunker(config, args.token_limit);
    let documents = discover_documents(&args.paths, &config.project_id)?;

    let mut chunks = Vec::new();
    for document in &documents {
        chunks.extend(
            chunker
                .chunk(&document.text)
                .enumerate()
                .map(|(idx, segment)| segment.into_chunk(&document.document_id, idx)),
        );
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&chunks)?),
        "text" | "" => {
            for chunk in &chunks {
                let tokens = chunker.counter().count(&chunk.content);
                println!(
                    "--- {} #{} lines {}-{} ({} tokens) {}",
                    &chunk.document_id[..chunk.document_id.len().min(8)],
                    chunk.chunk_index,
                    chunk.start_line + 1,
                    chunk.end_line + 1,
                    tokens,
                    chunk.chunk_id
                );
                println!("{}", chunk.content);
            }
            println!(
                "{} documents, {} chunks (limit {} tokens)",
                documents.len(),
                chunks.len(),
                chunker.token_limit()
            );
        }
        other => bail!("unknown format `{}` (expected text or json)", other),
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn chunks_files_with_override_limit() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("memo.md"),
            "Acme Corp hired Bob. Bob runs IT.\nThe board meets monthly.\n",
        )
        .unwrap();

        let mut config = Config::defaults();
        config.token_counter = "whitespace".into();
        let chunks = run(
            ChunkArgs {
                paths: vec![dir.path().to_path_buf()],
                token_limit: Some(6),
                format: "json".into(),
            },
            &config,
        )
        .unwrap();

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().enumerate().all(|(i, c)| c.chunk_index == i));
        assert!(chunks.iter().all(|c| c.content.split_whitespace().count() <= 6));
    }

    #[test]
    fn rejects_unknown_format() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "text").unwrap();
        let args = ChunkArgs {
            paths: vec![dir.path().to_path_buf()],
            token_limit: None,
            format: "xml".into(),
        };
        assert!(run(args, &Config::defaults()).is_err());
    }
}
