//! Avatar Agent Server
//!
//! HTTP control surface and event WebSocket for one avatar session.

pub mod http;
pub mod metrics;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::{init_metrics, metrics_handler};
pub use state::AppState;
pub use websocket::{ClientMessage, WebSocketHandler};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use avatar_agent_agent::AgentError;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session not started")]
    NotStarted,

    /// Configuration incomplete for the requested action
    #[error("{0}")]
    Precondition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AgentError> for ServerError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::NotStarted => ServerError::NotStarted,
            AgentError::Precondition(msg) => ServerError::Precondition(msg),
            AgentError::Config(msg) => ServerError::Config(msg),
            other @ (AgentError::Llm(_)
            | AgentError::Speech(_)
            | AgentError::Transport(_)
            | AgentError::Tool(_)) => ServerError::Upstream(other.to_string()),
        }
    }
}

impl From<avatar_agent_config::ConfigError> for ServerError {
    fn from(err: avatar_agent_config::ConfigError) -> Self {
        ServerError::Config(err.to_string())
    }
}

impl From<ServerError> for avatar_agent_core::Error {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Config(msg) => avatar_agent_core::Error::Config(msg),
            other => avatar_agent_core::Error::Agent(other.to_string()),
        }
    }
}

impl From<&ServerError> for StatusCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotStarted => StatusCode::CONFLICT,
            ServerError::Precondition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::Config(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = StatusCode::from(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
