//! RAG (Retrieval-Augmented Generation) core
//!
//! End-to-end flow for answering a farmer's question:
//! - Semantic retrieval over the knowledge index
//! - Context assembly with source attribution
//! - Grounded answer synthesis via the generative backend
//! - Request coordination: rate limiting, response caching, single-flight
//!   coalescing, retry and degraded-mode fallback

pub mod cache;
pub mod context;
pub mod pipeline;
pub mod ratelimit;
pub mod retriever;
pub mod singleflight;
pub mod synthesizer;

pub use cache::fingerprint;
pub use cache::ResponseCache;
pub use context::ContextAssembler;
pub use pipeline::ChatService;
pub use ratelimit::FixedWindowRateLimiter;
pub use retriever::Retriever;
pub use singleflight::SingleFlight;
pub use synthesizer::AnswerSynthesizer;

use crate::models::KnowledgeSnippet;

/// One retrieved snippet with its similarity score
#[derive(Debug, Clone)]
pub struct ScoredSnippet {
    pub snippet: KnowledgeSnippet,
    pub score: f32,
}

/// Ranked retrieval output; lives for one request only.
///
/// Invariant: no entry scores below `threshold`.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub entries: Vec<ScoredSnippet>,
    pub threshold: f32,
}

impl RetrievalResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
