//! Embedding API clients for various providers

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::embeddings::EmbeddingBackend;
use crate::embeddings::EmbeddingKind;
use crate::errors::KrishiRagError;
use crate::errors::Result;

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// `OpenAI`-compatible embeddings API
    OpenAI,
    /// Ollama local embeddings
    Ollama,
}

/// HTTP client for generating embeddings
pub struct HttpEmbeddingClient {
    provider: EmbeddingProvider,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    expected_dimension: usize,
    client: Client,
}

impl HttpEmbeddingClient {
    /// Create a new embedding client
    ///
    /// # Errors
    /// - HTTP client build errors (invalid configuration)
    pub fn new(
        provider: EmbeddingProvider,
        model: String,
        endpoint: String,
        api_key: Option<String>,
        expected_dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| KrishiRagError::Http(e.to_string()))?;

        Ok(Self {
            provider,
            model,
            endpoint,
            api_key,
            expected_dimension,
            client,
        })
    }

    /// Build from the embeddings section of the application config
    pub fn from_config(config: &crate::config::AppConfig) -> Result<Self> {
        let endpoint = &config.embeddings.endpoint;
        let provider = if config.embeddings.api_key.is_none()
            || endpoint.contains("localhost")
            || endpoint.contains("11434")
        {
            EmbeddingProvider::Ollama
        } else {
            EmbeddingProvider::OpenAI
        };

        Self::new(
            provider,
            config.embeddings.model.clone(),
            endpoint.clone(),
            config.embeddings.api_key.clone(),
            config.embeddings.dimension,
            Duration::from_secs(config.embeddings.timeout_secs),
        )
    }

    async fn generate_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.endpoint.trim_end_matches('/'));
        let request = OpenAiEmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| KrishiRagError::EmbeddingService(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KrishiRagError::EmbeddingService(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KrishiRagError::EmbeddingService(e.to_string()))?;

        let mut data = parsed.data;
        // The API is allowed to reorder; restore input order by index
        data.sort_by_key(|d| d.index);
        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        self.check_dimensions(&embeddings)?;
        Ok(embeddings)
    }

    async fn generate_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embeddings", self.endpoint.trim_end_matches('/'));

        // Ollama has no batch endpoint; issue one call per text
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let request = OllamaEmbeddingRequest {
                model: &self.model,
                prompt: text,
            };

            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| KrishiRagError::EmbeddingService(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(KrishiRagError::EmbeddingService(format!(
                    "embedding endpoint returned {status}"
                )));
            }

            let parsed: OllamaEmbeddingResponse = response
                .json()
                .await
                .map_err(|e| KrishiRagError::EmbeddingService(e.to_string()))?;
            embeddings.push(parsed.embedding);
        }

        self.check_dimensions(&embeddings)?;
        Ok(embeddings)
    }

    fn check_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<()> {
        for embedding in embeddings {
            if embedding.len() != self.expected_dimension {
                return Err(KrishiRagError::EmbeddingService(format!(
                    "expected {}-dimensional embedding, got {}",
                    self.expected_dimension,
                    embedding.len()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingClient {
    async fn embed_batch(&self, texts: &[String], kind: EmbeddingKind) -> Result<Vec<Vec<f32>>> {
        debug!(
            "Embedding {} text(s) as {} via {:?}",
            texts.len(),
            kind.as_str(),
            self.provider
        );

        match self.provider {
            EmbeddingProvider::OpenAI => self.generate_openai(texts).await,
            EmbeddingProvider::Ollama => self.generate_ollama(texts).await,
        }
    }
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}
