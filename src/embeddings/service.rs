//! Embedding service: normalization plus a short-TTL cache over a backend

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::debug;

use crate::embeddings::normalize_text;
use crate::embeddings::EmbeddingBackend;
use crate::embeddings::EmbeddingKind;
use crate::embeddings::MAX_BATCH_SIZE;
use crate::errors::KrishiRagError;
use crate::errors::Result;

#[derive(Clone)]
struct CachedVector {
    vector: Vec<f32>,
    expires_at: Instant,
}

impl CachedVector {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Caching front of the embedding gateway.
///
/// Input is normalized before hitting the cache or the backend, so two
/// questions differing only in casing or whitespace share one embedding
/// call. Entries expire on a short TTL; eviction is time-based.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    cache: RwLock<HashMap<(EmbeddingKind, String), CachedVector>>,
    ttl: Duration,
}

impl EmbeddingService {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Build from config with the HTTP backend
    pub fn from_config(config: &crate::config::AppConfig) -> Result<Self> {
        let backend = Arc::new(crate::embeddings::HttpEmbeddingClient::from_config(config)?);
        Ok(Self::new(
            backend,
            Duration::from_secs(config.embeddings.cache_ttl_secs),
        ))
    }

    /// Embed a single text.
    ///
    /// # Errors
    /// - `EmptyInput` when the text is empty after normalization
    /// - `EmbeddingService` on backend failure (retryable by the caller)
    pub async fn embed(&self, text: &str, kind: EmbeddingKind) -> Result<Vec<f32>> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Err(KrishiRagError::EmptyInput);
        }

        let key = (kind, normalized.clone());
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if !entry.is_expired() {
                    debug!("Embedding cache hit for {} text", kind.as_str());
                    return Ok(entry.vector.clone());
                }
            }
        }

        let mut vectors = self
            .backend
            .embed_batch(std::slice::from_ref(&normalized), kind)
            .await?;
        let vector = vectors.pop().ok_or_else(|| {
            KrishiRagError::EmbeddingService("backend returned no embedding".to_string())
        })?;

        let mut cache = self.cache.write().await;
        cache.retain(|_, entry| !entry.is_expired());
        cache.insert(
            key,
            CachedVector {
                vector: vector.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );

        Ok(vector)
    }

    /// Embed a batch of documents for ingestion, chunked to the backend's
    /// batch limit. Documents bypass the cache: ingestion text rarely
    /// repeats and would only displace hot query entries.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut normalized = Vec::with_capacity(texts.len());
        for text in texts {
            let n = normalize_text(text);
            if n.is_empty() {
                return Err(KrishiRagError::EmptyInput);
            }
            normalized.push(n);
        }

        let mut all = Vec::with_capacity(normalized.len());
        for chunk in normalized.chunks(MAX_BATCH_SIZE) {
            let vectors = self
                .backend
                .embed_batch(chunk, EmbeddingKind::Document)
                .await?;
            all.extend(vectors);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;

    use super::*;

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        async fn embed_batch(
            &self,
            texts: &[String],
            _kind: EmbeddingKind,
        ) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_empty_input_rejected_before_backend() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let service = EmbeddingService::new(backend.clone(), Duration::from_secs(60));

        let err = service.embed("   \n ", EmbeddingKind::Query).await;
        assert!(matches!(err, Err(KrishiRagError::EmptyInput)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_identical_normalized_texts_share_one_call() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let service = EmbeddingService::new(backend.clone(), Duration::from_secs(60));

        service
            .embed("Best time to sow paddy", EmbeddingKind::Query)
            .await
            .unwrap();
        service
            .embed("  best TIME to sow   paddy ", EmbeddingKind::Query)
            .await
            .unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_new_call() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let service = EmbeddingService::new(backend.clone(), Duration::from_millis(10));

        service.embed("paddy", EmbeddingKind::Query).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        service.embed("paddy", EmbeddingKind::Query).await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
