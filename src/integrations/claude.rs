//! Anthropic Claude API client.
//!
//! Claude has no JSON response mode; the prompts ask for JSON and the caller
//! unwraps fenced output.

use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CompletionClient, CompletionRequest, CompletionSettings};
use crate::{Error, Result};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Anthropic Claude client.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ClaudeClient {
    /// Create client from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .map_err(|_| Error::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
        Self::new(api_key, DEFAULT_MODEL)
    }

    /// Create client with API key and model.
    pub fn new<S: Into<String>>(api_key: S, model: &str) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("ANTHROPIC_API_KEY is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("knowledge_builder/0.1.0")
            .build()
            .map_err(|e| Error::InvalidArgument(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: CLAUDE_API_URL.to_string(),
            model: model.to_string(),
            temperature: 0.2,
            max_tokens: 4096,
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_settings(mut self, settings: &CompletionSettings) -> Self {
        self.model = settings.model.clone();
        self.temperature = settings.temperature;
        self.max_tokens = settings.max_tokens;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Chat with a system prompt.
    pub async fn chat_with_system(&self, message: &str, system: Option<&str>) -> Result<String> {
        let payload = ClaudeRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: message.to_string(),
            }],
            system: system.map(str::to_string),
        };

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Oracle(format!("Claude request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Oracle(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Oracle(format!("Claude error {}: {}", status, text)));
        }

        let claude_response: ClaudeResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Oracle(format!("Invalid Claude response: {} - {}", e, text)))?;

        claude_response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| Error::Oracle("Empty response from Claude".to_string()))
    }
}

#[async_trait]
impl CompletionClient for ClaudeClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let system = (!request.system.is_empty()).then_some(request.system.as_str());
        self.chat_with_system(&request.user, system).await
    }

    fn provider(&self) -> &'static str {
        "anthropic"
    }
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}
