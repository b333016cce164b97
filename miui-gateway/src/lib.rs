//! OpenAI- and Claude-compatible gateway in front of the MIUI AI-search
//! assistant, keeping per-user conversation context across requests.

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod api;
pub mod core;
pub mod middleware;
pub mod models;
pub mod utils;

use crate::api::chat::ChatState;

/// Request bodies above this size are rejected.
pub const MAX_BODY_BYTES: usize = 10 << 20;

pub fn create_app(state: ChatState) -> Router {
    use crate::middleware::{error_handler, request_id};
    use axum::middleware;

    let api_routes = Router::new()
        .route("/v1/chat/completions", post(api::chat::chat_completions))
        .route("/v1/responses", post(api::responses::create_response))
        .route("/v1/messages", post(api::messages::create_message))
        .route("/stats", get(api::stats::get_stats))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .route("/v1/models", get(api::models::list_models))
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(request_id::add_request_id))
        .layer(middleware::from_fn(error_handler::handle_errors))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
