//! Axum Router Configuration

use crate::{
    handlers,
    models::{ChatRequest, ErrorBody},
    state::AppState,
};

use axum::{
    Json, Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::chat, handlers::health),
    components(schemas(ChatRequest, ErrorBody)),
    tags(
        (name = "Gesture Relay", description = "Streams completions to gesture dispatch clients")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route(
            "/api/chat",
            post(handlers::chat).fallback(handlers::method_not_allowed),
        )
        .with_state(app_state);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(api_router)
}
