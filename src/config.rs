use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub backtrace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    /// TTL for the normalized-text embedding cache, in seconds
    #[serde(default = "default_embedding_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_cache_ttl() -> u64 {
    300
}

fn default_call_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,
    /// Hard cap on post-processed answer length, in characters
    #[serde(default = "default_max_answer_chars")]
    pub max_answer_chars: usize,
    /// How many recent conversation turns go into the prompt
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    500
}

fn default_max_answer_chars() -> usize {
    4000
}

fn default_history_turns() -> usize {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,
    /// Findings below this confidence are dropped
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

fn default_min_confidence() -> f32 {
    0.3
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Entries below this cosine similarity never reach the synthesizer
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_min_top_k")]
    pub min_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_top_k() -> usize {
    5
}

fn default_min_top_k() -> usize {
    3
}

fn default_max_top_k() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Per-user retention cap; the oldest turns are evicted on append
    #[serde(default = "default_max_turns")]
    pub max_turns_per_user: usize,
}

fn default_max_turns() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_response_ttl")]
    pub response_ttl_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_response_ttl() -> u64 {
    600
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_requests_per_window() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub enable_cors: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub embeddings: EmbeddingsConfig,
    pub llm: LlmConfig,
    pub vision: VisionConfig,
    #[serde(default = "RetrievalConfig::default")]
    pub retrieval: RetrievalConfig,
    #[serde(default = "ConversationConfig::default")]
    pub conversation: ConversationConfig,
    #[serde(default = "CacheConfig::default")]
    pub cache: CacheConfig,
    #[serde(default = "RateLimitConfig::default")]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "RetryConfig::default")]
    pub retry: RetryConfig,
    #[serde(default = "ServerConfig::default")]
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default config file path
    pub fn load() -> crate::Result<Self> {
        // Try to load from config.toml first, then fall back to config.example.toml
        if Path::new("config.toml").exists() {
            Self::from_file("config.toml")
        } else if Path::new("config.example.toml").exists() {
            tracing::warn!(
                "Using config.example.toml. Please create config.toml for production use."
            );
            Self::from_file("config.example.toml")
        } else {
            Err(crate::KrishiRagError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No config file found. Please create config.toml or config.example.toml",
            )))
        }
    }

    fn validate(&self) -> crate::Result<()> {
        if self.retrieval.min_top_k > self.retrieval.max_top_k {
            return Err(crate::KrishiRagError::Config(format!(
                "retrieval.min_top_k ({}) exceeds retrieval.max_top_k ({})",
                self.retrieval.min_top_k, self.retrieval.max_top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err(crate::KrishiRagError::Config(format!(
                "retrieval.similarity_threshold must be within [0, 1], got {}",
                self.retrieval.similarity_threshold
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(crate::KrishiRagError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get embedding dimension
    pub fn embedding_dimension(&self) -> usize {
        self.embeddings.dimension
    }

    /// Get embedding model name
    pub fn embedding_model(&self) -> &str {
        &self.embeddings.model
    }

    /// Get LLM endpoint
    pub fn llm_endpoint(&self) -> &str {
        &self.llm.endpoint
    }

    /// Get LLM model
    pub fn llm_model(&self) -> &str {
        &self.llm.model
    }

    /// Get the relevance cutoff applied by the retriever
    pub fn similarity_threshold(&self) -> f32 {
        self.retrieval.similarity_threshold
    }

    /// Clamp a requested top-k into the configured bounds
    pub fn clamp_top_k(&self, k: usize) -> usize {
        k.clamp(self.retrieval.min_top_k, self.retrieval.max_top_k)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            default_top_k: default_top_k(),
            min_top_k: default_min_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns_per_user: default_max_turns(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            response_ttl_secs: default_response_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                backtrace: true,
            },
            embeddings: EmbeddingsConfig {
                endpoint: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "text-embedding-3-small".to_string(),
                dimension: crate::embeddings::DEFAULT_EMBEDDING_DIM,
                cache_ttl_secs: default_embedding_cache_ttl(),
                timeout_secs: default_call_timeout(),
            },
            llm: LlmConfig {
                endpoint: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: default_llm_model(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
                timeout_secs: default_call_timeout(),
                max_answer_chars: default_max_answer_chars(),
                history_turns: default_history_turns(),
            },
            vision: VisionConfig {
                endpoint: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: default_llm_model(),
                timeout_secs: default_call_timeout(),
                min_confidence: default_min_confidence(),
                max_image_bytes: default_max_image_bytes(),
            },
            retrieval: RetrievalConfig::default(),
            conversation: ConversationConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding_dimension(), 1536);
        assert_eq!(config.clamp_top_k(1), 3);
        assert_eq!(config.clamp_top_k(50), 8);
        assert_eq!(config.clamp_top_k(5), 5);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_str = r#"
[logging]
level = "debug"
backtrace = false

[embeddings]
endpoint = "http://localhost:11434"
model = "nomic-embed-text"
dimension = 768

[llm]
endpoint = "http://localhost:11434"
model = "gemma3:27b"

[vision]
endpoint = "http://localhost:11434"

[retrieval]
similarity_threshold = 0.6
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml_str).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.embedding_dimension(), 768);
        assert!((config.similarity_threshold() - 0.6).abs() < f32::EPSILON);
        // Unspecified sections fall back to defaults
        assert_eq!(config.rate_limit.requests_per_window, 60);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut config = AppConfig::default();
        config.retrieval.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
