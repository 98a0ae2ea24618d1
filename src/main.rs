//! Knowledge builder CLI - main entry point

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use knowledge_builder::{commands, metrics, Config};
use tracing::warn;

#[derive(Parser)]
#[command(name = "knowledge_builder")]
#[command(about = "Incremental knowledge-graph builder", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Path to config.yml
    #[arg(short, long, env = "KB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents into the project graph
    Ingest {
        /// Files or directories (.md, .txt)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Project id (overrides config)
        #[arg(short, long)]
        project: Option<String>,

        /// Chunk size in tokens (overrides config)
        #[arg(long)]
        token_limit: Option<usize>,

        /// Use in-memory stores; nothing is persisted
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Write a JSON run report
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the chunks documents would be split into
    Chunk {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Chunk size in tokens (overrides config)
        #[arg(long)]
        token_limit: Option<usize>,

        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Extract questionnaire claims from documents
    Claims {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Questionnaire JSON file
        #[arg(short, long)]
        questionnaire: PathBuf,

        /// Project id (overrides config)
        #[arg(short, long)]
        project: Option<String>,

        /// Minimum relevance (1-5) to keep a claim
        #[arg(long)]
        min_relevance: Option<u8>,

        /// Output JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Ingest { .. } => "ingest",
            Commands::Chunk { .. } => "chunk",
            Commands::Claims { .. } => "claims",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("knowledge_builder=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::new(),
    };

    let command_name = cli.command.name();
    metrics::record_command_start(command_name);
    let start = Instant::now();

    let result = execute_command(cli.command, config).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    result
}

async fn execute_command(command: Commands, config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Ingest {
            paths,
            project,
            token_limit,
            dry_run,
            report,
        } => {
            let args = commands::IngestArgs {
                paths,
                project,
                token_limit,
                dry_run,
                report,
            };
            commands::ingest_run(args, config).await?;
        }
        Commands::Chunk {
            paths,
            token_limit,
            format,
        } => {
            let args = commands::ChunkArgs {
                paths,
                token_limit,
                format,
            };
            commands::chunk_run(args, &config)?;
        }
        Commands::Claims {
            paths,
            questionnaire,
            project,
            min_relevance,
            output,
        } => {
            let args = commands::ClaimsArgs {
                paths,
                questionnaire,
                project,
                min_relevance,
                output,
            };
            commands::claims_run(args, config).await?;
        }
    }

    Ok(())
}
