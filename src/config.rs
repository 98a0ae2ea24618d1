//! Configuration for the knowledge builder
//!
//! Loads configuration from config.yml, with `${VAR}` placeholders and
//! well-known environment variables taking precedence for strings.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::integrations::CompletionSettings;
use crate::knowledge::{PipelineSettings, RetryPolicy};
use crate::{Error, Result};

/// Default constants (fallback if config.yml not found)
pub const DEFAULT_PROJECT_ID: &str = "default";
pub const DEFAULT_TOKEN_LIMIT: usize = 600;
pub const DEFAULT_TOKEN_COUNTER: &str = "cl100k";
pub const DEFAULT_PREVIOUS_CHUNK_RATIO: f64 = 0.5;
pub const DEFAULT_SUMMARY_TOKEN_LIMIT: usize = 4000;
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_DOCUMENT_CONCURRENCY: usize = 4;
pub const DEFAULT_CONSOLIDATION_CONCURRENCY: usize = 8;
pub const DEFAULT_MIN_CLAIM_RELEVANCE: u8 = 4;
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_ELASTIC_INDEX: &str = "documents";
pub const DEFAULT_STORAGE_DIR: &str = "data";

/// Which chat completion API backs the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

impl LlmProvider {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "openai" => Ok(LlmProvider::OpenAI),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            other => Err(Error::Config(format!("unknown llm provider `{}`", other))),
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => DEFAULT_MODEL,
            LlmProvider::Anthropic => crate::integrations::claude::DEFAULT_MODEL,
        }
    }

    /// Environment variable holding the API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// YAML config structures
#[derive(Debug, Deserialize)]
struct YamlConfig {
    project: Option<ProjectConfig>,
    pipeline: Option<PipelineConfig>,
    llm: Option<LlmConfig>,
    neo4j: Option<Neo4jConfig>,
    elastic: Option<ElasticConfig>,
    storage: Option<StorageConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectConfig {
    id: Option<String>,
    persona: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineConfig {
    token_limit: Option<usize>,
    token_counter: Option<String>,
    previous_chunk_ratio: Option<f64>,
    summary_token_limit: Option<usize>,
    document_concurrency: Option<usize>,
    consolidation_concurrency: Option<usize>,
    oracle_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    min_claim_relevance: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmConfig {
    provider: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    api_key: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Neo4jConfig {
    uri: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ElasticConfig {
    url: Option<String>,
    index: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageConfig {
    dir: Option<String>,
    prompts_dir: Option<String>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    pub persona: String,
    pub scope: String,

    pub token_limit: usize,
    pub token_counter: String,
    pub previous_chunk_ratio: f64,
    pub summary_token_limit: usize,
    pub document_concurrency: usize,
    pub consolidation_concurrency: usize,
    pub oracle_timeout_secs: u64,
    pub max_retries: u32,
    pub min_claim_relevance: u8,

    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub llm_api_key: String,
    pub llm_base_url: Option<String>,

    /// Neo4j is used when a URI is configured.
    pub neo4j_uri: Option<String>,
    pub neo4j_user: String,
    pub neo4j_password: String,

    /// Elasticsearch is used when a URL is configured.
    pub elastic_url: Option<String>,
    pub elastic_index: String,
    pub elastic_user: Option<String>,
    pub elastic_password: Option<String>,

    /// Graph JSON files and the document ledger live here.
    pub storage_dir: PathBuf,
    pub prompts_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    pub fn new() -> Self {
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| Self::defaults())
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> String {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return env_val;
                }
                // Unresolved placeholder
                return std::env::var(env_key).unwrap_or_default();
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            return env_val;
        }
        value.unwrap_or_default()
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse YAML text, resolving environment overrides.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let yaml: YamlConfig = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        let project = yaml.project.unwrap_or_default();
        let pipeline = yaml.pipeline.unwrap_or_default();
        let llm = yaml.llm.unwrap_or_default();
        let neo4j = yaml.neo4j.unwrap_or_default();
        let elastic = yaml.elastic.unwrap_or_default();
        let storage = yaml.storage.unwrap_or_default();

        let llm_provider =
            LlmProvider::parse(&Self::resolve_env_string(llm.provider, "LLM_PROVIDER"))?;
        let llm_api_key = Self::resolve_env_string(llm.api_key, llm_provider.api_key_env());

        let previous_chunk_ratio = pipeline
            .previous_chunk_ratio
            .unwrap_or(DEFAULT_PREVIOUS_CHUNK_RATIO);
        if !(0.0..=1.0).contains(&previous_chunk_ratio) {
            return Err(Error::Config(format!(
                "pipeline.previous_chunk_ratio must be within 0..=1, got {}",
                previous_chunk_ratio
            )));
        }

        let project_id = non_empty(Self::resolve_env_string(project.id, "KB_PROJECT_ID"))
            .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string());

        Ok(Self {
            project_id,
            persona: project.persona.unwrap_or_default(),
            scope: project.scope.unwrap_or_default(),

            token_limit: pipeline.token_limit.unwrap_or(DEFAULT_TOKEN_LIMIT).max(1),
            token_counter: pipeline
                .token_counter
                .unwrap_or_else(|| DEFAULT_TOKEN_COUNTER.to_string()),
            previous_chunk_ratio,
            summary_token_limit: pipeline
                .summary_token_limit
                .unwrap_or(DEFAULT_SUMMARY_TOKEN_LIMIT),
            document_concurrency: pipeline
                .document_concurrency
                .unwrap_or(DEFAULT_DOCUMENT_CONCURRENCY),
            consolidation_concurrency: pipeline
                .consolidation_concurrency
                .unwrap_or(DEFAULT_CONSOLIDATION_CONCURRENCY),
            oracle_timeout_secs: pipeline
                .oracle_timeout_secs
                .unwrap_or(DEFAULT_ORACLE_TIMEOUT_SECS),
            max_retries: pipeline.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            min_claim_relevance: pipeline
                .min_claim_relevance
                .unwrap_or(DEFAULT_MIN_CLAIM_RELEVANCE),

            llm_provider,
            llm_model: llm
                .model
                .unwrap_or_else(|| llm_provider.default_model().to_string()),
            llm_temperature: llm.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            llm_max_tokens: llm.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            llm_api_key,
            llm_base_url: llm.base_url.and_then(non_empty),

            neo4j_uri: non_empty(Self::resolve_env_string(neo4j.uri, "NEO4J_URI")),
            neo4j_user: non_empty(Self::resolve_env_string(neo4j.user, "NEO4J_USER"))
                .unwrap_or_else(|| "neo4j".to_string()),
            neo4j_password: Self::resolve_env_string(neo4j.password, "NEO4J_PASSWORD"),

            elastic_url: non_empty(Self::resolve_env_string(elastic.url, "ELASTIC_URL")),
            elastic_index: elastic
                .index
                .unwrap_or_else(|| DEFAULT_ELASTIC_INDEX.to_string()),
            elastic_user: non_empty(Self::resolve_env_string(elastic.user, "ELASTIC_USER")),
            elastic_password: non_empty(Self::resolve_env_string(
                elastic.password,
                "ELASTIC_PASSWORD",
            )),

            storage_dir: PathBuf::from(
                storage
                    .dir
                    .unwrap_or_else(|| DEFAULT_STORAGE_DIR.to_string()),
            ),
            prompts_dir: storage.prompts_dir.map(PathBuf::from),
        })
    }

    /// Create config with defaults (fallback)
    pub fn defaults() -> Self {
        Self {
            project_id: DEFAULT_PROJECT_ID.to_string(),
            persona: String::new(),
            scope: String::new(),
            token_limit: DEFAULT_TOKEN_LIMIT,
            token_counter: DEFAULT_TOKEN_COUNTER.to_string(),
            previous_chunk_ratio: DEFAULT_PREVIOUS_CHUNK_RATIO,
            summary_token_limit: DEFAULT_SUMMARY_TOKEN_LIMIT,
            document_concurrency: DEFAULT_DOCUMENT_CONCURRENCY,
            consolidation_concurrency: DEFAULT_CONSOLIDATION_CONCURRENCY,
            oracle_timeout_secs: DEFAULT_ORACLE_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            min_claim_relevance: DEFAULT_MIN_CLAIM_RELEVANCE,
            llm_provider: LlmProvider::OpenAI,
            llm_model: DEFAULT_MODEL.to_string(),
            llm_temperature: DEFAULT_TEMPERATURE,
            llm_max_tokens: DEFAULT_MAX_TOKENS,
            llm_api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            llm_base_url: None,
            neo4j_uri: None,
            neo4j_user: "neo4j".to_string(),
            neo4j_password: String::new(),
            elastic_url: None,
            elastic_index: DEFAULT_ELASTIC_INDEX.to_string(),
            elastic_user: None,
            elastic_password: None,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            prompts_dir: None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.oracle_timeout_secs),
            self.max_retries,
        )
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            project_id: self.project_id.clone(),
            token_limit: self.token_limit,
            previous_chunk_ratio: self.previous_chunk_ratio,
            summary_token_limit: self.summary_token_limit,
            document_concurrency: self.document_concurrency,
            consolidation_concurrency: self.consolidation_concurrency,
            persona: self.persona.clone(),
            scope: self.scope.clone(),
            retry: self.retry_policy(),
        }
    }

    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            model: self.llm_model.clone(),
            temperature: self.llm_temperature,
            max_tokens: self.llm_max_tokens,
        }
    }

    /// Path of the local ingested-document ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.storage_dir.join("documents.json")
    }
}
