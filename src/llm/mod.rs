//! Generative-language service client

pub mod prompts;

pub use prompts::PreferredLanguage;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::errors::KrishiRagError;
use crate::errors::Result;

/// One message in a chat-completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user" or "assistant"
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Backend capable of completing a chat prompt.
///
/// Implemented by [`LlmService`] in production and by fakes in tests; the
/// synthesizer owns prompt assembly and post-processing, backends only see
/// the finished message list.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: usize,
    ) -> Result<String>;
}

/// HTTP client for an OpenAI-style chat-completions endpoint
pub struct LlmService {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl LlmService {
    /// Create a new LLM service
    ///
    /// # Errors
    /// - HTTP client build errors (invalid configuration)
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KrishiRagError::Http(e.to_string()))?;

        Ok(Self {
            endpoint,
            api_key,
            model,
            client,
        })
    }

    /// Build from the llm section of the application config
    pub fn from_config(config: &crate::config::AppConfig) -> Result<Self> {
        Self::new(
            config.llm.endpoint.clone(),
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            Duration::from_secs(config.llm.timeout_secs),
        )
    }
}

#[async_trait]
impl ChatBackend for LlmService {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: usize,
    ) -> Result<String> {
        debug!(
            "Chat completion: {} messages, model {}",
            messages.len(),
            self.model
        );

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| KrishiRagError::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KrishiRagError::Synthesis(format!(
                "chat endpoint returned {status}: {body}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| KrishiRagError::Synthesis(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| KrishiRagError::Synthesis("chat endpoint returned no choices".into()))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: usize,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatMessage,
}
