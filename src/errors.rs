use thiserror::Error;

#[derive(Error, Debug)]
pub enum KrishiRagError {
    #[error("Question is empty after normalization")]
    EmptyInput,

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Answer synthesis failed: {0}")]
    Synthesis(String),

    #[error("Image diagnosis unavailable: {0}")]
    DiagnosisUnavailable(String),

    #[error("Conversation store error: {0}")]
    ConversationStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KrishiRagError {
    /// Transient dependency failures that the coordinator may retry with
    /// backoff before degrading the response.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingService(_) | Self::Synthesis(_) | Self::DiagnosisUnavailable(_)
        )
    }

    /// Client-caused failures that are surfaced immediately, never retried
    /// and never converted into a degraded answer.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput | Self::InvalidImage(_) | Self::RateLimited { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, KrishiRagError>;
