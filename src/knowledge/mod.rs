//! Knowledge index: the read path the retriever consumes
//!
//! The index holds pre-ingested snippets (crop guides, pest advisories,
//! Q&A pairs) with their embeddings. It is built out-of-band and replaced
//! wholesale on re-ingestion; request handling only takes read snapshots,
//! so retrieval never contends with ingestion.

pub mod ingest;

pub use ingest::IngestDocument;
pub use ingest::KnowledgeIngestor;

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::models::KnowledgeSnippet;

/// Cosine similarity between two vectors of equal dimension.
///
/// Returns 0.0 for mismatched dimensions or zero-magnitude vectors rather
/// than propagating an error: such entries simply never clear the
/// relevance threshold.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-memory vector index over knowledge snippets.
///
/// Writers install a full replacement; readers clone an `Arc` snapshot and
/// scan it lock-free, so no lock is held while similarities are computed.
pub struct KnowledgeIndex {
    snippets: RwLock<Arc<Vec<KnowledgeSnippet>>>,
}

impl KnowledgeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snippets: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Install a new snippet set, replacing the previous one wholesale
    pub async fn replace_all(&self, snippets: Vec<KnowledgeSnippet>) {
        let count = snippets.len();
        let mut guard = self.snippets.write().await;
        *guard = Arc::new(snippets);
        info!("Knowledge index replaced: {} snippets", count);
    }

    /// Take a read snapshot of the current snippet set
    pub async fn snapshot(&self) -> Arc<Vec<KnowledgeSnippet>> {
        self.snippets.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.snippets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snippets.read().await.is_empty()
    }
}

impl Default for KnowledgeIndex {
    fn default() -> Self {
        Self::new()
    }
}
