//! Retrieval over the knowledge index

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::errors::Result;
use crate::knowledge::cosine_similarity;
use crate::knowledge::KnowledgeIndex;
use crate::models::RetrievalFilters;
use crate::rag::RetrievalResult;
use crate::rag::ScoredSnippet;

/// Ranked, deduplicated, threshold-filtered candidate retrieval
pub struct Retriever {
    index: Arc<KnowledgeIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(index: Arc<KnowledgeIndex>, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    /// Retrieve the top-`k` snippets for a query vector.
    ///
    /// `k` is clamped to the configured bounds; entries below the relevance
    /// threshold are discarded. Zero survivors is an empty result, not an
    /// error; the synthesizer handles the no-context case.
    pub async fn retrieve(
        &self,
        query_vector: &[f32],
        filters: &RetrievalFilters,
        k: usize,
    ) -> Result<RetrievalResult> {
        let k = k.clamp(self.config.min_top_k, self.config.max_top_k);
        let threshold = self.config.similarity_threshold;
        let snapshot = self.index.snapshot().await;

        let mut scored: Vec<ScoredSnippet> = snapshot
            .iter()
            .filter(|snippet| filters.matches(&snippet.metadata))
            .map(|snippet| ScoredSnippet {
                score: cosine_similarity(query_vector, &snippet.embedding),
                snippet: snippet.clone(),
            })
            .filter(|entry| entry.score >= threshold)
            .collect();

        // Descending by similarity; ties break by more recent ingestion
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.snippet
                        .metadata
                        .ingested_at
                        .cmp(&a.snippet.metadata.ingested_at)
                })
        });

        let mut seen = HashSet::new();
        scored.retain(|entry| seen.insert(entry.snippet.id));
        scored.truncate(k);

        debug!(
            "Retrieved {}/{} snippets above threshold {}",
            scored.len(),
            snapshot.len(),
            threshold
        );

        Ok(RetrievalResult {
            entries: scored,
            threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::KnowledgeSnippet;
    use crate::models::SnippetMetadata;

    fn snippet(text: &str, embedding: Vec<f32>, crop: Option<&str>, age_days: i64) -> KnowledgeSnippet {
        KnowledgeSnippet {
            id: Uuid::new_v4(),
            text: text.to_string(),
            embedding,
            metadata: SnippetMetadata {
                crop: crop.map(String::from),
                region: None,
                language: "english".to_string(),
                source: "handbook".to_string(),
                ingested_at: Utc::now() - Duration::days(age_days),
            },
        }
    }

    fn config(threshold: f32) -> RetrievalConfig {
        RetrievalConfig {
            similarity_threshold: threshold,
            default_top_k: 5,
            min_top_k: 1,
            max_top_k: 8,
        }
    }

    async fn build_retriever(snippets: Vec<KnowledgeSnippet>, threshold: f32) -> Retriever {
        let index = Arc::new(KnowledgeIndex::new());
        index.replace_all(snippets).await;
        Retriever::new(index, config(threshold))
    }

    #[tokio::test]
    async fn test_nothing_below_threshold_is_returned() {
        let retriever = build_retriever(
            vec![
                snippet("close", vec![1.0, 0.0], None, 0),
                snippet("far", vec![0.0, 1.0], None, 0),
                snippet("middling", vec![0.7, 0.7], None, 0),
            ],
            0.9,
        )
        .await;

        let result = retriever
            .retrieve(&[1.0, 0.0], &RetrievalFilters::default(), 5)
            .await
            .unwrap();

        assert!(result.entries.iter().all(|e| e.score >= 0.9));
        assert_eq!(result.len(), 1);
        assert_eq!(result.entries[0].snippet.text, "close");
    }

    #[tokio::test]
    async fn test_empty_result_when_all_below_threshold() {
        let retriever =
            build_retriever(vec![snippet("far", vec![0.0, 1.0], None, 0)], 0.9).await;

        let result = retriever
            .retrieve(&[1.0, 0.0], &RetrievalFilters::default(), 5)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_filter_restricts_candidates() {
        let retriever = build_retriever(
            vec![
                snippet("paddy advice", vec![1.0, 0.0], Some("paddy"), 0),
                snippet("banana advice", vec![1.0, 0.0], Some("banana"), 0),
            ],
            0.5,
        )
        .await;

        let filters = RetrievalFilters {
            crop: Some("paddy".to_string()),
            ..Default::default()
        };
        let result = retriever.retrieve(&[1.0, 0.0], &filters, 5).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.entries[0].snippet.text, "paddy advice");
    }

    #[tokio::test]
    async fn test_ties_break_by_newer_ingestion() {
        let retriever = build_retriever(
            vec![
                snippet("old", vec![1.0, 0.0], None, 30),
                snippet("new", vec![1.0, 0.0], None, 1),
            ],
            0.5,
        )
        .await;

        let result = retriever
            .retrieve(&[1.0, 0.0], &RetrievalFilters::default(), 2)
            .await
            .unwrap();
        assert_eq!(result.entries[0].snippet.text, "new");
        assert_eq!(result.entries[1].snippet.text, "old");
    }

    #[tokio::test]
    async fn test_k_is_clamped_to_bounds() {
        let snippets: Vec<_> = (0..20)
            .map(|i| snippet(&format!("s{i}"), vec![1.0, 0.0], None, 0))
            .collect();
        let retriever = build_retriever(snippets, 0.5).await;

        let result = retriever
            .retrieve(&[1.0, 0.0], &RetrievalFilters::default(), 100)
            .await
            .unwrap();
        assert_eq!(result.len(), 8);
    }
}
