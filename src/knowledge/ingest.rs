//! Batch ingestion of curated knowledge into the index

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::embeddings::EmbeddingService;
use crate::errors::Result;
use crate::knowledge::KnowledgeIndex;
use crate::models::KnowledgeSnippet;
use crate::models::SnippetMetadata;

/// One document in an ingestion batch, before embedding
#[derive(Debug, Clone, Deserialize)]
pub struct IngestDocument {
    pub text: String,
    #[serde(default)]
    pub crop: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    pub source: String,
}

fn default_language() -> String {
    "malayalam".to_string()
}

/// Embeds ingestion batches and installs them into the index.
///
/// The index is replaced wholesale: snippets are immutable once ingested
/// and corrections ship as a new batch, never as in-place edits.
pub struct KnowledgeIngestor {
    index: Arc<KnowledgeIndex>,
    embeddings: Arc<EmbeddingService>,
}

impl KnowledgeIngestor {
    pub fn new(index: Arc<KnowledgeIndex>, embeddings: Arc<EmbeddingService>) -> Self {
        Self { index, embeddings }
    }

    /// Embed a document batch and install it as the new index content.
    ///
    /// # Errors
    /// - `EmptyInput` when any document is empty after normalization
    /// - `EmbeddingService` on backend failure
    pub async fn ingest_batch(&self, documents: Vec<IngestDocument>) -> Result<usize> {
        if documents.is_empty() {
            self.index.replace_all(Vec::new()).await;
            return Ok(0);
        }

        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.embeddings.embed_documents(&texts).await?;

        let now = Utc::now();
        let snippets: Vec<KnowledgeSnippet> = documents
            .into_iter()
            .zip(embeddings)
            .map(|(doc, embedding)| KnowledgeSnippet {
                id: Uuid::new_v4(),
                text: doc.text,
                embedding,
                metadata: SnippetMetadata {
                    crop: doc.crop,
                    region: doc.region,
                    language: doc.language,
                    source: doc.source,
                    ingested_at: now,
                },
            })
            .collect();

        let count = snippets.len();
        self.index.replace_all(snippets).await;
        info!("Ingested {} knowledge documents", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::embeddings::EmbeddingBackend;
    use crate::embeddings::EmbeddingKind;

    struct FixedBackend;

    #[async_trait]
    impl EmbeddingBackend for FixedBackend {
        async fn embed_batch(
            &self,
            texts: &[String],
            _kind: EmbeddingKind,
        ) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect())
        }
    }

    #[tokio::test]
    async fn test_ingest_replaces_index_contents() {
        let index = Arc::new(KnowledgeIndex::new());
        let embeddings = Arc::new(crate::embeddings::EmbeddingService::new(
            Arc::new(FixedBackend),
            Duration::from_secs(60),
        ));
        let ingestor = KnowledgeIngestor::new(index.clone(), embeddings);

        let doc = |text: &str| IngestDocument {
            text: text.to_string(),
            crop: Some("paddy".to_string()),
            region: None,
            language: "english".to_string(),
            source: "krishi handbook".to_string(),
        };

        let count = ingestor
            .ingest_batch(vec![doc("sowing window"), doc("pest control")])
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(index.len().await, 2);

        // Re-ingestion replaces wholesale, never appends
        let count = ingestor.ingest_batch(vec![doc("irrigation")]).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(index.len().await, 1);
    }
}
