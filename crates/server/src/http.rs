//! HTTP Endpoints
//!
//! REST control surface for the avatar session.

use std::collections::HashMap;

use axum::{
    extract::{Json, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use avatar_agent_agent::{ConfigStatus, DocumentContext};

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::WebSocketHandler;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server.cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/config/status", get(config_status))
        .route("/api/config/keys", post(save_keys))
        .route("/api/session/start", post(start_session))
        .route("/api/session/stop", post(stop_session))
        .route("/api/microphone", post(toggle_microphone))
        .route("/api/speech/stop", post(stop_speaking))
        .route("/api/chat", post(chat))
        .route("/api/history/clear", post(clear_history))
        .route("/api/document", put(set_document).delete(clear_document))
        .route("/metrics", get(metrics_handler))
        .route("/ws/events", get(WebSocketHandler::handle))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Configured origins, or any origin when none are configured
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS];
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    tracing::info!("CORS configured with {} origins", parsed.len());
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(methods)
        .allow_headers(Any)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "session_started": state.session.is_started(),
        "media_state": state.session.media_state(),
    }))
}

async fn config_status(State(state): State<AppState>) -> Json<ConfigStatus> {
    Json(state.session.config_status())
}

#[derive(Debug, Deserialize)]
struct SaveKeysRequest {
    keys: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct SaveKeysResponse {
    saved: usize,
    status: ConfigStatus,
}

async fn save_keys(
    State(state): State<AppState>,
    Json(request): Json<SaveKeysRequest>,
) -> Result<Json<SaveKeysResponse>, ServerError> {
    let saved = state.session.save_keys(&request.keys)?;
    Ok(Json(SaveKeysResponse {
        saved,
        status: state.session.config_status(),
    }))
}

async fn start_session(State(state): State<AppState>) -> Result<StatusCode, ServerError> {
    state.session.start().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_session(State(state): State<AppState>) -> StatusCode {
    state.session.stop().await;
    StatusCode::NO_CONTENT
}

async fn toggle_microphone(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let listening = state.session.toggle_microphone().await?;
    Ok(Json(serde_json::json!({ "listening": listening })))
}

async fn stop_speaking(State(state): State<AppState>) -> StatusCode {
    state.session.stop_speaking().await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    text: String,
    #[serde(default)]
    image_url: Option<String>,
}

/// Runs one full turn; transcript and speech arrive on the event socket
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<StatusCode, ServerError> {
    if request.text.trim().is_empty() && request.image_url.is_none() {
        return Err(ServerError::InvalidRequest("text must not be empty".to_string()));
    }
    state
        .session
        .submit_query(&request.text, request.image_url.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_history(State(state): State<AppState>) -> StatusCode {
    state.session.clear_history().await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct DocumentRequest {
    file_name: String,
    text: String,
}

async fn set_document(
    State(state): State<AppState>,
    Json(request): Json<DocumentRequest>,
) -> impl IntoResponse {
    tracing::info!(
        file_name = %request.file_name,
        chars = request.text.chars().count(),
        "Document context set"
    );
    state
        .session
        .set_document(DocumentContext::new(request.file_name, request.text))
        .await;
    StatusCode::NO_CONTENT
}

async fn clear_document(State(state): State<AppState>) -> StatusCode {
    state.session.clear_document().await;
    StatusCode::NO_CONTENT
}
