//! Response caching keyed by request fingerprint
//!
//! A fingerprint is a deterministic hash of the normalized request inputs:
//! the user's language/region profile, the normalized question text and the
//! image hash when present. Lookups are exact-match only; there are no
//! partial or fuzzy hits. Entries are small, so eviction is purely
//! time-based.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use sha2::Digest;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::debug;

use crate::embeddings::normalize_text;
use crate::models::ChatResponse;

/// Compute the cache / single-flight fingerprint for a request.
///
/// The question is normalized first, so casing and whitespace differences
/// coalesce onto one key.
#[must_use]
pub fn fingerprint(
    language: &str,
    region: Option<&str>,
    question: &str,
    image_sha256: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(language.to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(region.unwrap_or("").to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_text(question).as_bytes());
    hasher.update(b"|");
    hasher.update(image_sha256.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash raw image bytes for fingerprinting and audit references
#[must_use]
pub fn image_hash(image: &[u8]) -> String {
    hex::encode(Sha256::digest(image))
}

#[derive(Clone)]
struct CacheEntry {
    response: ChatResponse,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired_cleanups: u64,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL-bounded response cache shared across request tasks
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    stats: RwLock<CacheStats>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Exact-fingerprint lookup; expired entries are removed on sight
    pub async fn get(&self, fingerprint: &str) -> Option<ChatResponse> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(fingerprint) {
                if !entry.is_expired() {
                    self.stats.write().await.hits += 1;
                    debug!("Response cache hit");
                    return Some(entry.response.clone());
                }
            } else {
                self.stats.write().await.misses += 1;
                return None;
            }
        }

        // Entry exists but expired: drop it under the write lock
        let mut entries = self.entries.write().await;
        entries.remove(fingerprint);
        let mut stats = self.stats.write().await;
        stats.misses += 1;
        stats.expired_cleanups += 1;
        debug!("Response cache miss (expired)");
        None
    }

    pub async fn put(&self, fingerprint: String, response: ChatResponse) {
        let mut entries = self.entries.write().await;
        entries.insert(
            fingerprint,
            CacheEntry {
                response,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Clean up expired entries
    pub async fn cleanup_expired(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before - entries.len();
        if removed > 0 {
            self.stats.write().await.expired_cleanups += removed as u64;
            debug!("Cleaned up {} expired response cache entries", removed);
        }
    }

    /// Start the periodic cleanup task
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.cleanup_expired().await;
            }
        });
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(answer: &str) -> ChatResponse {
        ChatResponse {
            answer: answer.to_string(),
            citations: vec![],
            diagnosis: None,
            degraded: false,
            trust_score: 0.8,
            tips: vec![],
            cached: false,
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_normalized() {
        let a = fingerprint("malayalam", Some("kerala"), "Best time to SOW paddy", None);
        let b = fingerprint("Malayalam", Some("Kerala"), "  best time to sow   paddy ", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_per_component() {
        let base = fingerprint("malayalam", Some("kerala"), "sow paddy", None);
        assert_ne!(base, fingerprint("english", Some("kerala"), "sow paddy", None));
        assert_ne!(base, fingerprint("malayalam", None, "sow paddy", None));
        assert_ne!(base, fingerprint("malayalam", Some("kerala"), "sow banana", None));
        assert_ne!(
            base,
            fingerprint("malayalam", Some("kerala"), "sow paddy", Some("abc123"))
        );
    }

    #[tokio::test]
    async fn test_entry_served_until_ttl_then_miss() {
        let cache = ResponseCache::new(Duration::from_millis(40));
        cache.put("fp".to_string(), response("answer")).await;

        assert!(cache.get("fp").await.is_some());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("fp").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_entries() {
        let cache = ResponseCache::new(Duration::from_millis(10));
        cache.put("a".to_string(), response("x")).await;
        cache.put("b".to_string(), response("y")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        cache.cleanup_expired().await;
        assert!(cache.is_empty().await);
    }
}
