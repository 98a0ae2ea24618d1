//! External integrations module.
//!
//! Provides chat completion clients for:
//! - OpenAI (JSON mode)
//! - Anthropic Claude

use async_trait::async_trait;

use crate::Result;

pub mod claude;
pub mod openai;

pub use claude::ClaudeClient;
pub use openai::OpenAIClient;

/// One system + user prompt exchange.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Ask the provider for a JSON object response where it supports it.
    pub json_output: bool,
}

impl CompletionRequest {
    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_output: true,
        }
    }
}

/// Model, sampling and length settings shared by the providers.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

/// Chat completion provider.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Provider name for logs and metrics.
    fn provider(&self) -> &'static str;
}

#[async_trait]
impl<T: CompletionClient + ?Sized> CompletionClient for Box<T> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request).await
    }

    fn provider(&self) -> &'static str {
        (**self).provider()
    }
}
