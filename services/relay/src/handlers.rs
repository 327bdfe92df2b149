//! Axum Handlers
//!
//! `POST /api/chat` validates the request, opens the upstream stream and
//! returns the transcoded body. Every failure before the first byte is a JSON
//! `{"error": ...}` response.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use futures_util::StreamExt;
use std::{convert::Infallible, sync::Arc};
use tracing::{error, info, instrument, warn};

use crate::{
    models::{ChatRequest, ErrorBody},
    relay::transcode,
    state::AppState,
    upstream::UpstreamError,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    MethodNotAllowed,
    MissingCredential,
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed".to_string(),
            ),
            ApiError::MissingCredential => {
                error!("Upstream credential is not configured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    UpstreamError::MissingCredential.to_string(),
                )
            }
            ApiError::BadGateway(message) => (StatusCode::BAD_GATEWAY, message),
            ApiError::Internal(message) => {
                error!("Internal Server Error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::MissingCredential => ApiError::MissingCredential,
            UpstreamError::Status { .. } => ApiError::BadGateway(err.to_string()),
            UpstreamError::Transport(e) => ApiError::BadGateway(format!("Upstream unavailable: {}", e)),
            UpstreamError::Request(e) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Extracts a non-empty string `prompt` from a raw JSON body.
fn parse_prompt(body: &[u8]) -> Result<String, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::BadRequest("Invalid JSON".to_string()))?;
    value
        .get("prompt")
        .and_then(serde_json::Value::as_str)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("Missing \"prompt\" field".to_string()))
}

/// Stream a completion for a prompt as simplified Server-Sent Events.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Stream of `data: {\"text\"}` frames ending with `data: [DONE]`", content_type = "text/event-stream", body = String),
        (status = 400, description = "Invalid JSON or missing prompt", body = ErrorBody),
        (status = 405, description = "Method not allowed", body = ErrorBody),
        (status = 500, description = "Upstream credential not configured", body = ErrorBody),
        (status = 502, description = "Upstream rejected the request", body = ErrorBody)
    )
)]
#[instrument(skip_all)]
pub async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let prompt = parse_prompt(&body).inspect_err(|e| warn!(error = ?e, "Rejected chat request"))?;
    info!(
        model = %state.config.chat_model,
        prompt_chars = prompt.chars().count(),
        "Opening upstream stream"
    );

    let upstream = state.upstream.stream_completion(&prompt).await?;
    let frames = transcode(upstream).map(Ok::<_, Infallible>);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(frames))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response)
}

/// Any method other than POST on the chat route.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = String))
)]
pub async fn health() -> &'static str {
    "ok"
}
