//! Embedding gateway: text normalization, backend clients and a TTL cache
//!
//! The pipeline never calls an embedding endpoint directly; it goes through
//! [`EmbeddingService`], which normalizes input, absorbs repeated identical
//! calls within a burst and maps backend failures into the crate error
//! taxonomy.

pub mod client;
pub mod service;

pub use client::EmbeddingProvider;
pub use client::HttpEmbeddingClient;
pub use service::EmbeddingService;

use async_trait::async_trait;

use crate::errors::Result;

/// Default embedding dimension for text-embedding-3-small
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Maximum batch size for document embedding during ingestion
pub const MAX_BATCH_SIZE: usize = 100;

/// Whether a text is embedded as a search query or an indexed document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingKind {
    Query,
    Document,
}

impl EmbeddingKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Document => "document",
        }
    }
}

/// Backend capable of turning text into fixed-size vectors.
///
/// Implemented by [`HttpEmbeddingClient`] in production and by fakes in
/// tests; the service layer owns normalization and caching, so backends
/// only see non-empty normalized text.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_batch(&self, texts: &[String], kind: EmbeddingKind) -> Result<Vec<Vec<f32>>>;
}

/// Normalize free text before embedding or fingerprinting: trim, lowercase,
/// collapse internal whitespace runs to single spaces.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
