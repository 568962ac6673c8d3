//! HTTP server implementation

use std::sync::Arc;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers::AppState;
use crate::api::routes;
use crate::config::AppConfig;
use crate::knowledge::KnowledgeIngestor;
use crate::rag::ChatService;
use crate::Result;

/// Start the API server
pub async fn serve_api(
    config: &AppConfig,
    host: String,
    port: u16,
    enable_cors: bool,
) -> Result<()> {
    info!("Starting KrishiRAG API server...");

    let service = Arc::new(ChatService::from_config(config)?);
    service.start_maintenance();

    let ingestor = Arc::new(KnowledgeIngestor::new(
        service.index().clone(),
        service.embeddings().clone(),
    ));

    let state = AppState { service, ingestor };

    let mut app = Router::new().nest("/api", routes::api_routes(state));

    app = app
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    if enable_cors {
        info!("CORS enabled");
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("API server listening on http://{}", addr);
    info!("RESTful API available at http://{}/api", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::KrishiRagError::Http(e.to_string()))?;

    Ok(())
}
