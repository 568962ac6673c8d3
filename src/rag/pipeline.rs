//! Request coordinator: the orchestration layer around the RAG pipeline
//!
//! Sequences validation, rate limiting, response caching, single-flight
//! coalescing, image diagnosis, embedding, retrieval, synthesis and
//! persistence, with per-step timeouts, bounded retries and degraded-mode
//! fallback. No lock is held across an external call: the cache, limiter
//! and flight registry are only touched between steps.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::AppConfig;
use crate::config::RetryConfig;
use crate::conversation::ConversationStore;
use crate::conversation::MemoryConversationStore;
use crate::embeddings::normalize_text;
use crate::embeddings::EmbeddingKind;
use crate::embeddings::EmbeddingService;
use crate::errors::KrishiRagError;
use crate::errors::Result;
use crate::knowledge::KnowledgeIndex;
use crate::llm::prompts;
use crate::llm::ChatBackend;
use crate::llm::LlmService;
use crate::llm::PreferredLanguage;
use crate::models::ChatRequest;
use crate::models::ChatResponse;
use crate::models::DiagnosisResult;
use crate::models::TurnDraft;
use crate::models::TurnRole;
use crate::rag::cache;
use crate::rag::cache::CacheStats;
use crate::rag::fingerprint;
use crate::rag::singleflight::Flight;
use crate::rag::synthesizer::SynthesizerOptions;
use crate::rag::AnswerSynthesizer;
use crate::rag::FixedWindowRateLimiter;
use crate::rag::ResponseCache;
use crate::rag::RetrievalResult;
use crate::rag::Retriever;
use crate::rag::SingleFlight;
use crate::vision::DiagnosisService;
use crate::vision::HttpVisionClient;
use crate::vision::VisionBackend;

/// Per-request pipeline stage, traced on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    RateChecked,
    CacheChecked,
    Diagnosing,
    Embedding,
    Retrieving,
    Synthesizing,
    Persisting,
    Responded,
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!("Pipeline stage: {:?} -> {:?}", stage, next);
    *stage = next;
}

/// Runtime statistics for the stats endpoint
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub index_snippets: usize,
    pub cache: CacheStats,
    pub inflight_requests: usize,
}

/// Complete chat service: coordinator plus the components it sequences
pub struct ChatService {
    embeddings: Arc<EmbeddingService>,
    index: Arc<KnowledgeIndex>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    diagnosis: DiagnosisService,
    store: Arc<dyn ConversationStore>,
    cache: Arc<ResponseCache>,
    rate_limiter: FixedWindowRateLimiter,
    flights: SingleFlight,
    retry: RetryConfig,
    default_top_k: usize,
    history_turns: usize,
    cache_cleanup_interval: Duration,
}

impl ChatService {
    /// Assemble the service from explicit components.
    ///
    /// Backends and the store are passed in rather than ambient, so tests
    /// substitute fakes without touching the network.
    pub fn new(
        config: &AppConfig,
        embeddings: Arc<EmbeddingService>,
        index: Arc<KnowledgeIndex>,
        chat_backend: Arc<dyn ChatBackend>,
        vision_backend: Arc<dyn VisionBackend>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let retriever = Retriever::new(index.clone(), config.retrieval.clone());
        let synthesizer =
            AnswerSynthesizer::new(chat_backend, SynthesizerOptions::from_config(config));
        let diagnosis = DiagnosisService::new(
            vision_backend,
            config.vision.min_confidence,
            config.vision.max_image_bytes,
        );

        Self {
            embeddings,
            index,
            retriever,
            synthesizer,
            diagnosis,
            store,
            cache: Arc::new(ResponseCache::new(Duration::from_secs(
                config.cache.response_ttl_secs,
            ))),
            rate_limiter: FixedWindowRateLimiter::from_config(config),
            flights: SingleFlight::new(),
            retry: config.retry.clone(),
            default_top_k: config.retrieval.default_top_k,
            history_turns: config.llm.history_turns,
            cache_cleanup_interval: Duration::from_secs(config.cache.cleanup_interval_secs),
        }
    }

    /// Wire up the production service with HTTP backends and the in-memory
    /// conversation store.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let embeddings = Arc::new(EmbeddingService::from_config(config)?);
        let index = Arc::new(KnowledgeIndex::new());
        let chat_backend: Arc<dyn ChatBackend> = Arc::new(LlmService::from_config(config)?);
        let vision_backend: Arc<dyn VisionBackend> =
            Arc::new(HttpVisionClient::from_config(config)?);
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new(
            config.conversation.max_turns_per_user,
        ));

        Ok(Self::new(
            config,
            embeddings,
            index,
            chat_backend,
            vision_backend,
            store,
        ))
    }

    /// Start background maintenance (periodic cache cleanup)
    pub fn start_maintenance(&self) {
        self.cache.start_cleanup_task(self.cache_cleanup_interval);
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    pub fn index(&self) -> &Arc<KnowledgeIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            index_snippets: self.index.len().await,
            cache: self.cache.stats().await,
            inflight_requests: self.flights.inflight_count(),
        }
    }

    /// Handle one chat request end to end.
    ///
    /// # Errors
    /// - `EmptyInput`, `InvalidImage`, `RateLimited`: client-caused,
    ///   surfaced immediately
    /// - `ConversationStore`: fatal for this request
    ///
    /// Transient dependency failures do not surface here; they degrade the
    /// response instead, with the `degraded` flag set.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let mut stage = Stage::Received;
        info!("Chat request from user {}", request.user_id);

        // Validation happens before anything is counted or cached
        let question = request.question.clone();
        if normalize_text(&question).is_empty() {
            return Err(KrishiRagError::EmptyInput);
        }

        let image = match &request.image_base64 {
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| KrishiRagError::InvalidImage(format!("invalid base64: {e}")))?;
                self.diagnosis.validate(&bytes)?;
                Some(bytes)
            }
            None => None,
        };

        let language = PreferredLanguage::parse(request.filters.language.as_deref());

        advance(&mut stage, Stage::RateChecked);
        self.rate_limiter.check(&request.user_id)?;

        let image_sha = image.as_deref().map(cache::image_hash);
        let key = fingerprint(
            language.as_str(),
            request.filters.region.as_deref(),
            &question,
            image_sha.as_deref(),
        );

        advance(&mut stage, Stage::CacheChecked);
        if let Some(mut hit) = self.cache.get(&key).await {
            hit.cached = true;
            advance(&mut stage, Stage::Responded);
            return Ok(hit);
        }

        match self.flights.begin(&key) {
            Flight::Follower(mut rx) => match rx.recv().await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(shared)) => Err(share_error(&shared)),
                Err(_) => Err(KrishiRagError::Synthesis(
                    "coalesced request was abandoned by its leader".to_string(),
                )),
            },
            Flight::Leader(guard) => {
                let outcome = self
                    .execute(&request, &question, image.as_deref(), image_sha, language, &key, &mut stage)
                    .await;

                match outcome {
                    Ok(response) => {
                        guard.finish(Ok(response.clone()));
                        Ok(response)
                    }
                    Err(error) => {
                        let shared = Arc::new(error);
                        guard.finish(Err(shared.clone()));
                        Err(share_error(&shared))
                    }
                }
            }
        }
    }

    /// The expensive part of the pipeline, run once per fingerprint
    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        request: &ChatRequest,
        question: &str,
        image: Option<&[u8]>,
        image_sha: Option<String>,
        language: PreferredLanguage,
        key: &str,
        stage: &mut Stage,
    ) -> Result<ChatResponse> {
        // Diagnosis is additional context, not a gate: only invalid images
        // fail the request, an unavailable vision service does not.
        let diagnosis: Option<DiagnosisResult> = match image {
            Some(bytes) => {
                advance(stage, Stage::Diagnosing);
                match self.diagnosis.diagnose(bytes).await {
                    Ok(result) => Some(result),
                    Err(error @ KrishiRagError::InvalidImage(_)) => return Err(error),
                    Err(error) => {
                        warn!("Proceeding without diagnosis context: {}", error);
                        None
                    }
                }
            }
            None => None,
        };

        advance(stage, Stage::Embedding);
        let query_vector = match self
            .with_retry("embedding", || {
                self.embeddings.embed(question, EmbeddingKind::Query)
            })
            .await
        {
            Ok(vector) => Some(vector),
            Err(error) if error.is_retryable() => {
                warn!("Embedding exhausted retries, degrading: {}", error);
                None
            }
            Err(error) => return Err(error),
        };

        let retrieved = match &query_vector {
            Some(vector) => {
                advance(stage, Stage::Retrieving);
                let k = request.top_k.unwrap_or(self.default_top_k);
                self.retriever.retrieve(vector, &request.filters, k).await?
            }
            None => RetrievalResult::default(),
        };

        let history = self
            .store
            .recent(&request.user_id, self.history_turns)
            .await?;

        // Degrade instead of erroring on synthesis/embedding exhaustion
        let synthesized = if query_vector.is_some() {
            advance(stage, Stage::Synthesizing);
            match self
                .with_retry("synthesis", || {
                    self.synthesizer.synthesize(
                        question,
                        language,
                        &history,
                        &retrieved,
                        diagnosis.as_ref(),
                    )
                })
                .await
            {
                Ok(answer) => Some(answer),
                Err(error) if error.is_retryable() => {
                    warn!("Synthesis exhausted retries, degrading: {}", error);
                    None
                }
                Err(error) => return Err(error),
            }
        } else {
            None
        };

        let (answer, citations, tips, trust_score, degraded) = match synthesized {
            Some(result) => {
                let degraded = !result.grounded;
                (
                    result.answer,
                    result.citations,
                    result.tips,
                    result.trust_score,
                    degraded,
                )
            }
            None => (
                prompts::fallback_message(language).to_string(),
                Vec::new(),
                Vec::new(),
                0.0,
                true,
            ),
        };

        advance(stage, Stage::Persisting);
        let user_draft = TurnDraft {
            role: TurnRole::User,
            text: question.to_string(),
            image_ref: image_sha.map(|sha| format!("sha256:{sha}")),
            diagnosis: diagnosis.clone(),
        };
        self.store.append(&request.user_id, user_draft).await?;
        self.store
            .append(&request.user_id, TurnDraft::assistant(answer.clone()))
            .await?;

        let response = ChatResponse {
            answer,
            citations,
            diagnosis,
            degraded,
            trust_score,
            tips,
            cached: false,
        };

        // Only fully formed answers are worth replaying for the TTL window;
        // a degraded one must not mask recovery
        if !response.degraded {
            self.cache.put(key.to_string(), response.clone()).await;
        }

        advance(stage, Stage::Responded);
        Ok(response)
    }

    /// Retry a transient step with exponential backoff
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.base_delay_ms * 2u64.pow(attempt - 1);
                    warn!(
                        "{} attempt {}/{} failed: {}; retrying in {}ms",
                        what, attempt, self.retry.max_attempts, error, delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Reconstruct a follower-facing error from the leader's shared failure.
///
/// Store failures keep their identity (they map to 503 at the surface);
/// anything else becomes a synthesis failure for the follower.
fn share_error(shared: &Arc<KrishiRagError>) -> KrishiRagError {
    match shared.as_ref() {
        KrishiRagError::ConversationStore(message) => {
            KrishiRagError::ConversationStore(message.clone())
        }
        other => KrishiRagError::Synthesis(other.to_string()),
    }
}
