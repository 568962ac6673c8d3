//! API request handlers

use std::sync::Arc;

use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::error;
use tracing::info;

use crate::api::types::ApiResponse;
use crate::api::types::HealthResponse;
use crate::api::types::HistoryQuery;
use crate::api::types::IngestRequest;
use crate::api::types::IngestResponse;
use crate::api::types::StatsResponse;
use crate::errors::KrishiRagError;
use crate::knowledge::KnowledgeIngestor;
use crate::models::ChatRequest;
use crate::models::ChatResponse;
use crate::models::ConversationTurn;
use crate::rag::ChatService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub ingestor: Arc<KnowledgeIngestor>,
}

/// Map a pipeline error onto the HTTP status it deserves
fn status_for(error: &KrishiRagError) -> StatusCode {
    match error {
        KrishiRagError::EmptyInput | KrishiRagError::InvalidImage(_) => StatusCode::BAD_REQUEST,
        KrishiRagError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        KrishiRagError::ConversationStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check handler
pub async fn health() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// Handle one chat turn
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ApiResponse<ChatResponse>>, (StatusCode, Json<ApiResponse<ChatResponse>>)> {
    info!("POST /api/chat (user {})", request.user_id);

    match state.service.chat(request).await {
        Ok(response) => Ok(Json(ApiResponse::success(response))),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Chat request failed: {}", e);
            }
            Err((status, Json(ApiResponse::error(e.to_string()))))
        }
    }
}

/// Fetch a user's recent conversation turns, oldest first
pub async fn history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<ConversationTurn>>>, StatusCode> {
    info!("GET /api/chat/history/{} limit={}", user_id, params.limit);

    match state.service.store().recent(&user_id, params.limit).await {
        Ok(turns) => Ok(Json(ApiResponse::success(turns))),
        Err(e) => {
            error!("Error fetching history: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Replace the knowledge index with a freshly embedded batch
pub async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<ApiResponse<IngestResponse>>, (StatusCode, Json<ApiResponse<IngestResponse>>)> {
    info!(
        "POST /api/knowledge/ingest ({} documents)",
        request.documents.len()
    );

    match state.ingestor.ingest_batch(request.documents).await {
        Ok(ingested) => Ok(Json(ApiResponse::success(IngestResponse { ingested }))),
        Err(e) => {
            let status = status_for(&e);
            error!("Ingestion failed: {}", e);
            Err((status, Json(ApiResponse::error(e.to_string()))))
        }
    }
}

/// Runtime statistics
pub async fn stats(State(state): State<AppState>) -> Json<ApiResponse<StatsResponse>> {
    let stats = state.service.stats().await;
    Json(ApiResponse::success(StatsResponse {
        index_snippets: stats.index_snippets,
        inflight_requests: stats.inflight_requests,
        cache_hits: stats.cache.hits,
        cache_misses: stats.cache.misses,
        cache_hit_rate: stats.cache.hit_rate(),
    }))
}
