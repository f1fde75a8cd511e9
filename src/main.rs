//! Bilingual media caption service.
//!
//! Accepts image/video uploads, asks a vision model for an English/Thai
//! caption, and serves the browser client that drives it.

mod api_docs;
mod error;
mod media;
mod prompts;
mod story;
mod video;
mod vision;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{info, warn};

use error::ApiError;
use media::UploadedFile;
use story::{AnalyzeResponse, CaptionService, ServiceMode};
use vision::{VisionClient, DEFAULT_API_BASE, DEFAULT_VISION_MODEL};

struct AppState {
    service: CaptionService,
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut files = Vec::new();
    let mut prompt = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart request: {}", e)))?
    {
        let field_name = field.name().map(|n| n.to_string());
        match field_name.as_deref() {
            Some("files") => {
                let filename = field.file_name().unwrap_or("unnamed").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(|e| {
                    ApiError::BadRequest(format!("Could not read file '{}': {}", filename, e))
                })?;
                files.push(UploadedFile {
                    filename,
                    content_type,
                    data: data.to_vec(),
                });
            }
            Some("prompt") => {
                prompt = field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Could not read prompt field: {}", e))
                })?;
            }
            _ => {}
        }
    }

    info!(
        "analyze request: {} file(s), prompt: '{}'",
        files.len(),
        prompt
    );

    let batch = media::classify(files)?;
    let analysis = state.service.analyze(batch, &prompt).await?;
    Ok(Json(analysis.into()))
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

async fn api_docs_page() -> Html<String> {
    Html(api_docs::generate_api_docs_html())
}

async fn health() -> &'static str {
    "ok"
}

/// Decides the service mode once at startup: a key that verifies against the
/// vision API gives live mode, anything else falls back to canned captions.
async fn resolve_service_mode() -> ServiceMode {
    let api_key = match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            warn!("OPENAI_API_KEY is not set; starting in offline fallback mode");
            return ServiceMode::Offline;
        }
    };

    let base_url =
        std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
    let model = std::env::var("VISION_MODEL").unwrap_or_else(|_| DEFAULT_VISION_MODEL.to_string());

    let client = VisionClient::new(api_key, base_url, model);
    match client.verify().await {
        Ok(()) => {
            info!("vision model '{}' verified, live mode enabled", client.model());
            ServiceMode::Live(client)
        }
        Err(e) => {
            warn!("vision model verification failed ({e:#}); starting in offline fallback mode");
            ServiceMode::Offline
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("media_story_captioner=info,tower_http=info")
            }),
        )
        .init();

    let mode = resolve_service_mode().await;
    let state = Arc::new(AppState {
        service: CaptionService::new(mode),
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/analyze", post(analyze))
        .route("/analyze/", post(analyze))
        .route("/api/docs", get(api_docs_page))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new("static"))
        .layer(DefaultBodyLimit::max(media::MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {}: {}", addr, e));

    info!("listening on http://{}", addr);
    axum::serve(listener, app).await.expect("server failed");
}
