//! End-to-end tests for the chat pipeline with instrumented fake backends

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use krishirag::config::AppConfig;
use krishirag::conversation::ConversationStore;
use krishirag::conversation::MemoryConversationStore;
use krishirag::embeddings::EmbeddingBackend;
use krishirag::embeddings::EmbeddingKind;
use krishirag::embeddings::EmbeddingService;
use krishirag::knowledge::KnowledgeIndex;
use krishirag::llm::ChatBackend;
use krishirag::llm::ChatMessage;
use krishirag::models::ChatRequest;
use krishirag::models::KnowledgeSnippet;
use krishirag::models::RetrievalFilters;
use krishirag::models::SnippetMetadata;
use krishirag::models::TurnRole;
use krishirag::rag::ChatService;
use krishirag::vision::ImageFormat;
use krishirag::vision::RawClassification;
use krishirag::vision::VisionBackend;
use krishirag::KrishiRagError;
use krishirag::Result;
use uuid::Uuid;

struct CountingEmbed {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingBackend for CountingEmbed {
    async fn embed_batch(
        &self,
        texts: &[String],
        _kind: EmbeddingKind,
    ) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

struct CountingChat {
    calls: AtomicUsize,
    reply: String,
    delay: Duration,
}

#[async_trait]
impl ChatBackend for CountingChat {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: usize,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.clone())
    }
}

struct UnavailableVision;

#[async_trait]
impl VisionBackend for UnavailableVision {
    async fn classify(
        &self,
        _image: &[u8],
        _format: ImageFormat,
    ) -> Result<Vec<RawClassification>> {
        Err(KrishiRagError::DiagnosisUnavailable(
            "vision endpoint down".to_string(),
        ))
    }
}

struct Harness {
    service: Arc<ChatService>,
    store: Arc<dyn ConversationStore>,
    embed_calls: Arc<CountingEmbed>,
    chat_calls: Arc<CountingChat>,
}

fn snippet(text: &str) -> KnowledgeSnippet {
    KnowledgeSnippet {
        id: Uuid::new_v4(),
        text: text.to_string(),
        embedding: vec![1.0, 0.0],
        metadata: SnippetMetadata {
            crop: Some("paddy".to_string()),
            region: Some("kerala".to_string()),
            language: "english".to_string(),
            source: "package of practices".to_string(),
            ingested_at: Utc::now(),
        },
    }
}

async fn harness(config: AppConfig, snippets: Vec<KnowledgeSnippet>, reply: &str) -> Harness {
    let embed_backend = Arc::new(CountingEmbed {
        calls: AtomicUsize::new(0),
    });
    let chat_backend = Arc::new(CountingChat {
        calls: AtomicUsize::new(0),
        reply: reply.to_string(),
        delay: Duration::from_millis(30),
    });

    let embeddings = Arc::new(EmbeddingService::new(
        embed_backend.clone(),
        Duration::from_secs(300),
    ));
    let index = Arc::new(KnowledgeIndex::new());
    index.replace_all(snippets).await;
    let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new(100));

    let service = Arc::new(ChatService::new(
        &config,
        embeddings,
        index,
        chat_backend.clone(),
        Arc::new(UnavailableVision),
        store.clone(),
    ));

    Harness {
        service,
        store,
        embed_calls: embed_backend,
        chat_calls: chat_backend,
    }
}

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.max_attempts = 1;
    config.retry.base_delay_ms = 1;
    config
}

fn request(user: &str, question: &str) -> ChatRequest {
    ChatRequest {
        user_id: user.to_string(),
        question: question.to_string(),
        conversation_id: None,
        image_base64: None,
        filters: RetrievalFilters::default(),
        top_k: None,
    }
}

fn jpeg_base64() -> String {
    let bytes = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[tokio::test]
async fn test_grounded_answer_with_citations() {
    let h = harness(
        fast_config(),
        vec![snippet("Sow paddy before the southwest monsoon.")],
        "Sow paddy in April before the monsoon arrives [1].",
    )
    .await;

    let response = h
        .service
        .chat(request("farmer-1", "best time to sow paddy"))
        .await
        .unwrap();

    assert!(!response.degraded);
    assert!(!response.cached);
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].source, "package of practices");
    assert!(response.trust_score > 0.5);
}

#[tokio::test]
async fn test_empty_question_rejected_before_any_work() {
    let h = harness(fast_config(), vec![snippet("x")], "irrelevant").await;

    let result = h.service.chat(request("farmer-1", "   \t  ")).await;
    assert!(matches!(result, Err(KrishiRagError::EmptyInput)));
    assert_eq!(h.embed_calls.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.chat_calls.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rate_limited_request_reaches_no_backend() {
    let mut config = fast_config();
    config.rate_limit.requests_per_window = 1;
    config.rate_limit.window_secs = 3600;
    let h = harness(config, vec![snippet("x")], "answer [1]").await;

    h.service
        .chat(request("farmer-1", "first question"))
        .await
        .unwrap();
    let embeds_before = h.embed_calls.calls.load(Ordering::SeqCst);

    let result = h.service.chat(request("farmer-1", "second question")).await;
    match result {
        Err(KrishiRagError::RateLimited { retry_after_secs }) => {
            assert!(retry_after_secs <= 3600);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(h.embed_calls.calls.load(Ordering::SeqCst), embeds_before);
}

#[tokio::test]
async fn test_concurrent_identical_requests_run_the_pipeline_once() {
    let h = harness(
        fast_config(),
        vec![snippet("Sow paddy before the southwest monsoon.")],
        "Sow in April [1].",
    )
    .await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .chat(request("farmer-1", "Best time to SOW paddy"))
                .await
        }));
    }

    let answers: Vec<String> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().answer)
        .collect();

    assert!(answers.iter().all(|a| a == &answers[0]));
    assert_eq!(h.embed_calls.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.chat_calls.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cached_response_served_until_ttl_expires() {
    let mut config = fast_config();
    config.cache.response_ttl_secs = 1;
    let h = harness(config, vec![snippet("x")], "answer [1]").await;

    let first = h
        .service
        .chat(request("farmer-1", "sow paddy"))
        .await
        .unwrap();
    assert!(!first.cached);

    let second = h
        .service
        .chat(request("farmer-2", "Sow   PADDY"))
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(h.chat_calls.calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let third = h
        .service
        .chat(request("farmer-1", "sow paddy"))
        .await
        .unwrap();
    assert!(!third.cached);
    assert_eq!(h.chat_calls.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_index_yields_ungrounded_uncached_answer() {
    let h = harness(
        fast_config(),
        vec![],
        "General guidance without local references.",
    )
    .await;

    let response = h
        .service
        .chat(request("farmer-1", "how to manage leaf spot"))
        .await
        .unwrap();

    assert!(response.degraded);
    assert!(response.citations.is_empty());
    assert!(response.trust_score < 0.5);

    // Degraded answers must not be replayed from the cache
    let again = h
        .service
        .chat(request("farmer-1", "how to manage leaf spot"))
        .await
        .unwrap();
    assert!(!again.cached);
    assert_eq!(h.chat_calls.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_vision_outage_does_not_fail_the_question() {
    let h = harness(fast_config(), vec![snippet("x")], "answer [1]").await;

    let mut req = request("farmer-1", "what is wrong with my paddy leaf");
    req.image_base64 = Some(jpeg_base64());

    let response = h.service.chat(req).await.unwrap();
    assert!(response.diagnosis.is_none());
    assert!(!response.degraded);
    assert!(!response.answer.is_empty());
}

#[tokio::test]
async fn test_undecodable_or_unsupported_image_is_a_client_error() {
    let h = harness(fast_config(), vec![snippet("x")], "answer [1]").await;

    let mut bad_encoding = request("farmer-1", "diagnose this");
    bad_encoding.image_base64 = Some("!!!not-base64!!!".to_string());
    assert!(matches!(
        h.service.chat(bad_encoding).await,
        Err(KrishiRagError::InvalidImage(_))
    ));

    let mut bad_format = request("farmer-1", "diagnose this");
    bad_format.image_base64 =
        Some(base64::engine::general_purpose::STANDARD.encode(b"GIF89a not supported"));
    assert!(matches!(
        h.service.chat(bad_format).await,
        Err(KrishiRagError::InvalidImage(_))
    ));

    assert_eq!(h.embed_calls.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_both_turns_persisted_in_order_with_image_ref() {
    let h = harness(fast_config(), vec![snippet("x")], "answer [1]").await;

    let mut req = request("farmer-1", "best time to sow paddy");
    req.image_base64 = Some(jpeg_base64());
    h.service.chat(req).await.unwrap();

    let turns = h.store.recent("farmer-1", 10).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[1].role, TurnRole::Assistant);
    assert!(turns[0].seq < turns[1].seq);
    assert!(turns[0]
        .image_ref
        .as_deref()
        .unwrap()
        .starts_with("sha256:"));
}
