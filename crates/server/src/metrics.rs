//! Prometheus exporter

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;
use crate::ServerError;

/// Install the global recorder and describe the counters the agent emits
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Internal(format!("metrics recorder: {}", e)))?;

    metrics::describe_counter!(
        "avatar_reconnects_total",
        "Avatar connection re-establishments by trigger"
    );
    metrics::describe_counter!(
        "avatar_tool_calls_total",
        "Tool calls by outcome (ok, error or rejected)"
    );
    metrics::describe_counter!(
        "avatar_utterances_total",
        "Sentences handed to the speak queue by outcome"
    );
    metrics::describe_counter!(
        "avatar_stream_parse_errors_total",
        "Completion stream lines that could not be parsed"
    );

    Ok(handle)
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}
