//! CLI command tests

mod test_chunk;
mod test_ingest;
